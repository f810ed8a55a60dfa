//! Process-shared condition variable on the monotonic clock.
//!
//! Timed waits convert the caller's relative timeout into an absolute
//! `CLOCK_MONOTONIC` deadline, so wall-clock jumps cannot shorten or extend
//! a wait. The record is `#[repr(C)]` and placeable in shared memory next to
//! the [`RobustMutex`] it pairs with.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicI32, Ordering};

use thiserror::Error;

use crate::mutex::RobustMutex;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CondVarError {
    #[error("condition variable is not initialized")]
    NotInitialized,
    #[error("condition variable attribute setup failed (errno {0})")]
    AttrSetupFailed(i32),
    #[error("condition variable initialization failed (errno {0})")]
    InitFailed(i32),
    #[error("wait timed out")]
    Timeout,
    #[error("condition wait failed (errno {0})")]
    WaitFailed(i32),
    #[error("condition signal failed (errno {0})")]
    SignalFailed(i32),
}

const STATE_UNINIT: i32 = 0;
const STATE_READY: i32 = 1;

/// Process-shared condvar, placeable in shared memory.
#[repr(C)]
pub struct ProcessCondVar {
    inner: UnsafeCell<libc::pthread_cond_t>,
    state: AtomicI32,
}

unsafe impl Send for ProcessCondVar {}
unsafe impl Sync for ProcessCondVar {}

impl ProcessCondVar {
    /// Initialize the record in place; creator side only.
    ///
    /// # Safety
    /// `this` must point to memory valid for a `ProcessCondVar` that no
    /// thread is using yet.
    pub unsafe fn init_in_place(this: *mut ProcessCondVar) -> Result<(), CondVarError> {
        let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
        unsafe {
            let rc = libc::pthread_condattr_init(attr.as_mut_ptr());
            if rc != 0 {
                (*this).state.store(STATE_UNINIT, Ordering::Release);
                return Err(CondVarError::AttrSetupFailed(rc));
            }
            let attr = attr.as_mut_ptr();
            let result = (|| {
                let rc = libc::pthread_condattr_setpshared(attr, libc::PTHREAD_PROCESS_SHARED);
                if rc != 0 {
                    return Err(CondVarError::AttrSetupFailed(rc));
                }
                let rc = libc::pthread_condattr_setclock(attr, libc::CLOCK_MONOTONIC);
                if rc != 0 {
                    return Err(CondVarError::AttrSetupFailed(rc));
                }
                let rc = libc::pthread_cond_init((*this).inner.get(), attr);
                if rc != 0 {
                    return Err(CondVarError::InitFailed(rc));
                }
                Ok(())
            })();
            libc::pthread_condattr_destroy(attr);
            match result {
                Ok(()) => {
                    (*this).state.store(STATE_READY, Ordering::Release);
                    Ok(())
                }
                Err(e) => {
                    (*this).state.store(STATE_UNINIT, Ordering::Release);
                    Err(e)
                }
            }
        }
    }

    /// Destroy the record in place, creator side only.
    ///
    /// The condvar is re-initialized immediately before destruction: a peer
    /// that died while referencing the condvar can otherwise make
    /// `pthread_cond_destroy` block forever.
    ///
    /// # Safety
    /// No thread of a live process may wait on the condvar.
    pub unsafe fn destroy_in_place(this: *mut ProcessCondVar) {
        unsafe {
            if (*this).state.swap(STATE_UNINIT, Ordering::AcqRel) != STATE_READY {
                return;
            }
            let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
            if libc::pthread_condattr_init(attr.as_mut_ptr()) == 0 {
                libc::pthread_cond_init((*this).inner.get(), attr.as_mut_ptr());
                libc::pthread_cond_destroy((*this).inner.get());
                libc::pthread_condattr_destroy(attr.as_mut_ptr());
            }
        }
    }

    fn check_ready(&self) -> Result<(), CondVarError> {
        if self.state.load(Ordering::Acquire) != STATE_READY {
            return Err(CondVarError::NotInitialized);
        }
        Ok(())
    }

    /// Wait until signalled. The mutex must be held by the caller.
    pub fn wait(&self, mutex: &RobustMutex) -> Result<(), CondVarError> {
        self.check_ready()?;
        let rc = unsafe { libc::pthread_cond_wait(self.inner.get(), mutex.native_handle()) };
        if rc != 0 {
            return Err(CondVarError::WaitFailed(rc));
        }
        Ok(())
    }

    /// Wait until signalled or until `timeout_ms` elapsed on the monotonic
    /// clock. The mutex must be held by the caller.
    pub fn wait_timeout(&self, mutex: &RobustMutex, timeout_ms: u64) -> Result<(), CondVarError> {
        self.check_ready()?;
        let deadline = monotonic_deadline(timeout_ms)?;
        let rc = unsafe {
            libc::pthread_cond_timedwait(self.inner.get(), mutex.native_handle(), &deadline)
        };
        match rc {
            0 => Ok(()),
            libc::ETIMEDOUT => Err(CondVarError::Timeout),
            rc => Err(CondVarError::WaitFailed(rc)),
        }
    }

    /// Wake one waiter.
    pub fn signal(&self) -> Result<(), CondVarError> {
        self.check_ready()?;
        let rc = unsafe { libc::pthread_cond_signal(self.inner.get()) };
        if rc != 0 {
            return Err(CondVarError::SignalFailed(rc));
        }
        Ok(())
    }
}

fn monotonic_deadline(timeout_ms: u64) -> Result<libc::timespec, CondVarError> {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) };
    if rc != 0 {
        return Err(CondVarError::WaitFailed(rc));
    }
    let nanos = now.tv_nsec as u64 + (timeout_ms % 1000) * 1_000_000;
    Ok(libc::timespec {
        tv_sec: now.tv_sec + (timeout_ms / 1000) as libc::time_t + (nanos / 1_000_000_000) as libc::time_t,
        tv_nsec: (nanos % 1_000_000_000) as libc::c_long,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    struct Pair {
        mutex: Box<RobustMutex>,
        cond: Box<ProcessCondVar>,
    }

    fn pair() -> Arc<Pair> {
        unsafe {
            let mut m: Box<MaybeUninit<RobustMutex>> = Box::new(MaybeUninit::uninit());
            RobustMutex::init_in_place(m.as_mut_ptr()).unwrap();
            let mut c: Box<MaybeUninit<ProcessCondVar>> = Box::new(MaybeUninit::uninit());
            ProcessCondVar::init_in_place(c.as_mut_ptr()).unwrap();
            Arc::new(Pair {
                mutex: Box::from_raw(Box::into_raw(m) as *mut RobustMutex),
                cond: Box::from_raw(Box::into_raw(c) as *mut ProcessCondVar),
            })
        }
    }

    #[test]
    fn timed_wait_times_out() {
        let p = pair();
        let start = Instant::now();
        p.mutex.lock().unwrap();
        let res = p.cond.wait_timeout(&p.mutex, 50);
        p.mutex.unlock().unwrap();
        assert_eq!(res, Err(CondVarError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn signal_wakes_waiter() {
        let p = pair();
        let waiter = {
            let p = Arc::clone(&p);
            std::thread::spawn(move || {
                p.mutex.lock().unwrap();
                let res = p.cond.wait_timeout(&p.mutex, 5000);
                p.mutex.unlock().unwrap();
                res
            })
        };
        // Give the waiter time to block, then signal under the mutex.
        std::thread::sleep(Duration::from_millis(50));
        p.mutex.lock().unwrap();
        p.cond.signal().unwrap();
        p.mutex.unlock().unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }
}

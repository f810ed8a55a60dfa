//! Robust, priority-inheriting mutex shareable between processes.
//!
//! The mutex record is `#[repr(C)]` so it can be placed directly into a
//! shared-memory region. The kernel flags the lock when its owner died
//! (`EOWNERDEAD`); the next locker repairs it with
//! `pthread_mutex_consistent`, unlocks and re-acquires, so a crashed peer
//! never wedges the transport.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicI32, Ordering};

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MutexError {
    #[error("mutex is not initialized")]
    NotInitialized,
    #[error("mutex attribute setup failed (errno {0})")]
    AttrSetupFailed(i32),
    #[error("mutex initialization failed (errno {0})")]
    InitFailed(i32),
    #[error("mutex lock failed (errno {0})")]
    LockFailed(i32),
    #[error("mutex unlock failed (errno {0})")]
    UnlockFailed(i32),
}

const STATE_UNINIT: i32 = 0;
const STATE_READY: i32 = 1;

/// Process-shared robust mutex, placeable in shared memory.
#[repr(C)]
pub struct RobustMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
    state: AtomicI32,
}

unsafe impl Send for RobustMutex {}
unsafe impl Sync for RobustMutex {}

impl RobustMutex {
    /// Initialize the record in place. Called exactly once by the creating
    /// process; the peer only references the record afterwards.
    ///
    /// # Safety
    /// `this` must point to memory valid for a `RobustMutex` that no thread
    /// is using yet.
    pub unsafe fn init_in_place(this: *mut RobustMutex) -> Result<(), MutexError> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        unsafe {
            let rc = libc::pthread_mutexattr_init(attr.as_mut_ptr());
            if rc != 0 {
                (*this).state.store(STATE_UNINIT, Ordering::Release);
                return Err(MutexError::AttrSetupFailed(rc));
            }
            let attr = attr.as_mut_ptr();
            let result = (|| {
                let rc = libc::pthread_mutexattr_setpshared(attr, libc::PTHREAD_PROCESS_SHARED);
                if rc != 0 {
                    return Err(MutexError::AttrSetupFailed(rc));
                }
                let rc = libc::pthread_mutexattr_setrobust(attr, libc::PTHREAD_MUTEX_ROBUST);
                if rc != 0 {
                    return Err(MutexError::AttrSetupFailed(rc));
                }
                let rc = libc::pthread_mutexattr_setprotocol(attr, libc::PTHREAD_PRIO_INHERIT);
                if rc != 0 {
                    return Err(MutexError::AttrSetupFailed(rc));
                }
                let rc = libc::pthread_mutex_init((*this).inner.get(), attr);
                if rc != 0 {
                    return Err(MutexError::InitFailed(rc));
                }
                Ok(())
            })();
            libc::pthread_mutexattr_destroy(attr);
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

    /// Destroy the record in place. Only the creating process calls this,
    /// after the peers are gone.
    ///
    /// # Safety
    /// No thread may hold or wait on the mutex.
    pub unsafe fn destroy_in_place(this: *mut RobustMutex) {
        unsafe {
            if (*this).state.swap(STATE_UNINIT, Ordering::AcqRel) == STATE_READY {
                libc::pthread_mutex_destroy((*this).inner.get());
            }
        }
    }

    fn check_ready(&self) -> Result<(), MutexError> {
        if self.state.load(Ordering::Acquire) != STATE_READY {
            return Err(MutexError::NotInitialized);
        }
        Ok(())
    }

    /// Repair an inconsistent mutex: mark consistent, release, re-acquire
    /// with `relock`.
    fn recover(&self, relock: impl Fn(*mut libc::pthread_mutex_t) -> i32) -> Result<(), MutexError> {
        let ptr = self.inner.get();
        let rc = unsafe { libc::pthread_mutex_consistent(ptr) };
        if rc != 0 {
            return Err(MutexError::LockFailed(rc));
        }
        let rc = unsafe { libc::pthread_mutex_unlock(ptr) };
        if rc != 0 {
            return Err(MutexError::LockFailed(rc));
        }
        let rc = relock(ptr);
        if rc != 0 {
            return Err(MutexError::LockFailed(rc));
        }
        Ok(())
    }

    pub fn lock(&self) -> Result<(), MutexError> {
        self.check_ready()?;
        let rc = unsafe { libc::pthread_mutex_lock(self.inner.get()) };
        match rc {
            0 => Ok(()),
            libc::EOWNERDEAD => self.recover(|m| unsafe { libc::pthread_mutex_lock(m) }),
            rc => Err(MutexError::LockFailed(rc)),
        }
    }

    pub fn try_lock(&self) -> Result<(), MutexError> {
        self.check_ready()?;
        let rc = unsafe { libc::pthread_mutex_trylock(self.inner.get()) };
        match rc {
            0 => Ok(()),
            libc::EOWNERDEAD => self.recover(|m| unsafe { libc::pthread_mutex_trylock(m) }),
            rc => Err(MutexError::LockFailed(rc)),
        }
    }

    pub fn unlock(&self) -> Result<(), MutexError> {
        self.check_ready()?;
        let rc = unsafe { libc::pthread_mutex_unlock(self.inner.get()) };
        if rc != 0 {
            return Err(MutexError::UnlockFailed(rc));
        }
        Ok(())
    }

    /// RAII lock; unlocks when the guard drops.
    pub fn guard(&self) -> Result<MutexGuard<'_>, MutexError> {
        self.lock()?;
        Ok(MutexGuard { mutex: self })
    }

    pub(crate) fn native_handle(&self) -> *mut libc::pthread_mutex_t {
        self.inner.get()
    }
}

/// Guard returned by [`RobustMutex::guard`].
pub struct MutexGuard<'a> {
    mutex: &'a RobustMutex,
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        let _ = self.mutex.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed_mutex() -> Box<RobustMutex> {
        let mut boxed: Box<MaybeUninit<RobustMutex>> = Box::new(MaybeUninit::uninit());
        unsafe {
            RobustMutex::init_in_place(boxed.as_mut_ptr()).unwrap();
            Box::from_raw(Box::into_raw(boxed) as *mut RobustMutex)
        }
    }

    #[test]
    fn lock_unlock() {
        let m = boxed_mutex();
        m.lock().unwrap();
        m.unlock().unwrap();
    }

    #[test]
    fn try_lock_contended() {
        let m = boxed_mutex();
        m.lock().unwrap();
        assert!(m.try_lock().is_err());
        m.unlock().unwrap();
        m.try_lock().unwrap();
        m.unlock().unwrap();
    }

    #[test]
    fn guard_unlocks() {
        let m = boxed_mutex();
        {
            let _g = m.guard().unwrap();
            assert!(m.try_lock().is_err());
        }
        m.try_lock().unwrap();
        m.unlock().unwrap();
    }
}

//! Blocking endpoint over the in-shm queue.
//!
//! An [`AudioIpc`] bundles the lock-free queue with a robust mutex and a
//! monotonic condvar for the blocking pop path, plus the popper-side stash:
//! a dequeued container whose type does not match the requested one is kept
//! for the next call instead of being dropped. Each queue has exactly one
//! popping process, so the stash needs no further synchronisation.

use std::cell::UnsafeCell;

use log::warn;
use thiserror::Error;

use smartx_shm::{CondVarError, MutexError, ProcessCondVar, RobustMutex};

use crate::container::{IpcMessage, MessageContainer};
use crate::queue::ShmQueue;

const LOG: &str = "ipc";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IpcError {
    #[error("queue is full")]
    BufferFull,
    #[error("queue is empty")]
    BufferEmpty,
    #[error("record does not fit the message payload")]
    InvalidSegmentSize,
    #[error("queued message has a different type")]
    InvalidParam,
    #[error("message failed the CRC check and was dropped")]
    CrcError,
    #[error("timeout waiting for a message")]
    Timeout,
    #[error("mutex failure: {0}")]
    Mutex(MutexError),
    #[error("condvar failure: {0}")]
    CondVar(CondVarError),
}

impl From<MutexError> for IpcError {
    fn from(e: MutexError) -> Self {
        IpcError::Mutex(e)
    }
}

struct Stash {
    exists: bool,
    container: MessageContainer,
}

/// One direction of the command channel, resident in shared memory.
#[repr(C)]
pub struct AudioIpc {
    queue: ShmQueue,
    mutex: RobustMutex,
    condvar: ProcessCondVar,
    stash: UnsafeCell<Stash>,
}

unsafe impl Send for AudioIpc {}
unsafe impl Sync for AudioIpc {}

impl AudioIpc {
    /// Initialize an endpoint in place; creator side only.
    ///
    /// # Safety
    /// `this` must point to memory valid for an `AudioIpc` that no other
    /// thread or process accesses yet.
    pub unsafe fn init_in_place(this: *mut AudioIpc) -> Result<(), IpcError> {
        unsafe {
            ShmQueue::init_in_place(std::ptr::addr_of_mut!((*this).queue));
            RobustMutex::init_in_place(std::ptr::addr_of_mut!((*this).mutex))
                .map_err(IpcError::Mutex)?;
            ProcessCondVar::init_in_place(std::ptr::addr_of_mut!((*this).condvar))
                .map_err(IpcError::CondVar)?;
            (*this).stash = UnsafeCell::new(Stash {
                exists: false,
                container: MessageContainer::default(),
            });
        }
        Ok(())
    }

    /// Tear an endpoint down in place; creator side only, after the peer is
    /// gone.
    ///
    /// # Safety
    /// No process may use the endpoint concurrently.
    pub unsafe fn destroy_in_place(this: *mut AudioIpc) {
        unsafe {
            ProcessCondVar::destroy_in_place(std::ptr::addr_of_mut!((*this).condvar));
            RobustMutex::destroy_in_place(std::ptr::addr_of_mut!((*this).mutex));
        }
    }

    #[allow(clippy::mut_from_ref)]
    fn stash(&self) -> &mut Stash {
        // Single-popper contract: only the popping process touches the stash.
        unsafe { &mut *self.stash.get() }
    }

    /// Serialize and enqueue a message, then wake the popper.
    pub fn push<T: IpcMessage>(&self, msg: &T) -> Result<(), IpcError> {
        let mut container = MessageContainer::default();
        if !container.load(msg) {
            return Err(IpcError::InvalidSegmentSize);
        }
        let guard = self.mutex.guard()?;
        if !self.queue.try_push(&container) {
            return Err(IpcError::BufferFull);
        }
        let _ = self.condvar.signal();
        drop(guard);
        Ok(())
    }

    /// Non-blocking pop of a message of type `T`.
    ///
    /// A container of a different type is stashed for the next call and
    /// `InvalidParam` is returned; a corrupt container is dropped with
    /// `CrcError`.
    pub fn pop_noblock<T: IpcMessage>(&self) -> Result<T, IpcError> {
        let stash = self.stash();
        if stash.exists {
            return match stash.container.extract::<T>() {
                Some(msg) => {
                    stash.exists = false;
                    Ok(msg)
                }
                None => Err(IpcError::InvalidParam),
            };
        }
        let container = self.queue.try_pop().ok_or(IpcError::BufferEmpty)?;
        if !container.is_good() {
            warn!(target: LOG, "dropping message with bad CRC (type {})", container.type_id());
            return Err(IpcError::CrcError);
        }
        match container.extract::<T>() {
            Some(msg) => Ok(msg),
            None => {
                stash.container = container;
                stash.exists = true;
                Err(IpcError::InvalidParam)
            }
        }
    }

    /// Blocking pop: waits on the condvar until a message is available.
    pub fn pop<T: IpcMessage>(&self) -> Result<T, IpcError> {
        let guard = self.mutex.guard()?;
        while !self.packages_available() {
            self.condvar
                .wait(&self.mutex)
                .map_err(IpcError::CondVar)?;
        }
        let result = self.pop_noblock();
        drop(guard);
        result
    }

    /// Blocking pop with a relative timeout in milliseconds.
    pub fn pop_timed_wait<T: IpcMessage>(&self, timeout_ms: u64) -> Result<T, IpcError> {
        let guard = self.mutex.guard()?;
        while !self.packages_available() {
            match self.condvar.wait_timeout(&self.mutex, timeout_ms) {
                Ok(()) => {}
                Err(CondVarError::Timeout) => return Err(IpcError::Timeout),
                Err(e) => return Err(IpcError::CondVar(e)),
            }
        }
        let result = self.pop_noblock();
        drop(guard);
        result
    }

    /// Non-destructive check whether the next message has type `T`. The
    /// container is prefetched into the stash.
    pub fn peek<T: IpcMessage>(&self) -> Result<(), IpcError> {
        let stash = self.stash();
        if !stash.exists {
            let container = self.queue.try_pop().ok_or(IpcError::BufferEmpty)?;
            if !container.is_good() {
                return Err(IpcError::CrcError);
            }
            stash.container = container;
            stash.exists = true;
        }
        if stash.container.matches::<T>() {
            Ok(())
        } else {
            Err(IpcError::InvalidParam)
        }
    }

    /// Type tag of the next message, or 0 when none is available or the
    /// next container is corrupt.
    pub fn next_id(&self) -> u32 {
        let stash = self.stash();
        if stash.exists {
            return stash.container.type_id();
        }
        match self.queue.try_pop() {
            Some(container) if container.is_good() => {
                stash.container = container;
                stash.exists = true;
                container.type_id()
            }
            _ => 0,
        }
    }

    /// Whether a pop would find a message.
    pub fn packages_available(&self) -> bool {
        self.stash().exists || !self.queue.is_empty()
    }

    /// Drop the next message, stashed or queued.
    pub fn discard_next(&self) -> Result<(), IpcError> {
        let stash = self.stash();
        if stash.exists {
            stash.exists = false;
            return Ok(());
        }
        self.queue.try_pop().ok_or(IpcError::BufferEmpty)?;
        Ok(())
    }

    /// Drop every pending message, including a stashed one.
    pub fn discard_all(&self) -> Result<(), IpcError> {
        let stash = self.stash();
        let had_any = stash.exists || !self.queue.is_empty();
        stash.exists = false;
        self.queue.drain();
        if had_any {
            Ok(())
        } else {
            Err(IpcError::BufferEmpty)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::IpcMessage;
    use crate::messages::{ControlCommand, CtrlMessage, Int32Message, ResponseMessage};
    use std::mem::MaybeUninit;
    use std::sync::Arc;

    fn boxed_ipc() -> Arc<AudioIpc> {
        let mut boxed: Box<MaybeUninit<AudioIpc>> = Box::new(MaybeUninit::uninit());
        unsafe {
            AudioIpc::init_in_place(boxed.as_mut_ptr()).unwrap();
            Arc::from_raw(Box::into_raw(boxed) as *mut AudioIpc)
        }
    }

    #[test]
    fn push_pop_round_trip() {
        let ipc = boxed_ipc();
        ipc.push(&CtrlMessage::new(ControlCommand::Start)).unwrap();
        let msg: CtrlMessage = ipc.pop_noblock().unwrap();
        assert_eq!(msg.control(), Some(ControlCommand::Start));
    }

    #[test]
    fn wrong_type_is_stashed() {
        let ipc = boxed_ipc();
        ipc.push(&Int32Message::new(ControlCommand::GetLatency, 480))
            .unwrap();
        // Asking for the wrong type stashes the message...
        assert_eq!(
            ipc.pop_noblock::<CtrlMessage>().unwrap_err(),
            IpcError::InvalidParam
        );
        assert!(ipc.packages_available());
        // ...and the right type still gets it.
        let msg: Int32Message = ipc.pop_noblock().unwrap();
        assert_eq!(msg.value, 480);
    }

    #[test]
    fn empty_pop() {
        let ipc = boxed_ipc();
        assert_eq!(
            ipc.pop_noblock::<CtrlMessage>().unwrap_err(),
            IpcError::BufferEmpty
        );
    }

    #[test]
    fn timed_pop_times_out() {
        let ipc = boxed_ipc();
        assert_eq!(
            ipc.pop_timed_wait::<CtrlMessage>(30).unwrap_err(),
            IpcError::Timeout
        );
    }

    #[test]
    fn blocking_pop_wakes_on_push() {
        let ipc = boxed_ipc();
        let popper = {
            let ipc = Arc::clone(&ipc);
            std::thread::spawn(move || ipc.pop_timed_wait::<ResponseMessage>(5000))
        };
        std::thread::sleep(std::time::Duration::from_millis(30));
        ipc.push(&ResponseMessage::new(
            ControlCommand::Parameters,
            ControlCommand::Ack,
        ))
        .unwrap();
        let msg = popper.join().unwrap().unwrap();
        assert!(msg.is_ack());
    }

    #[test]
    fn discard_all_clears_stash() {
        let ipc = boxed_ipc();
        ipc.push(&Int32Message::new(ControlCommand::GetLatency, 1))
            .unwrap();
        ipc.push(&CtrlMessage::new(ControlCommand::Stop)).unwrap();
        // Stash the first message by asking for the wrong type.
        assert_eq!(
            ipc.pop_noblock::<CtrlMessage>().unwrap_err(),
            IpcError::InvalidParam
        );
        ipc.discard_all().unwrap();
        assert!(!ipc.packages_available());
        assert_eq!(ipc.discard_all().unwrap_err(), IpcError::BufferEmpty);
    }

    #[test]
    fn next_id_prefetches() {
        let ipc = boxed_ipc();
        ipc.push(&CtrlMessage::new(ControlCommand::Drain)).unwrap();
        assert_eq!(ipc.next_id(), CtrlMessage::ID);
        // The prefetched message is still retrievable.
        let msg: CtrlMessage = ipc.pop_noblock().unwrap();
        assert_eq!(msg.control(), Some(ControlCommand::Drain));
        assert_eq!(ipc.next_id(), 0);
    }
}

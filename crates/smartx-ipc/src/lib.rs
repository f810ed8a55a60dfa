//! Typed command channel between the plugin and the router.
//!
//! Messages travel as fixed-size, CRC-protected containers through a
//! bounded lock-free queue that lives in shared memory. A mutex/condvar
//! pair next to the queue provides the blocking pop; the queue itself never
//! blocks, so a crashed pusher cannot corrupt a popper.

pub mod channel;
pub mod container;
pub mod messages;
pub mod queue;

pub use channel::{AudioIpc, IpcError};
pub use container::{IpcMessage, MessageContainer, PAYLOAD_CAPACITY};
pub use messages::{
    ControlCommand, CtrlMessage, FloatMessage, Int32Message, ParamMessage, ResponseMessage,
};
pub use queue::QUEUE_CAPACITY;

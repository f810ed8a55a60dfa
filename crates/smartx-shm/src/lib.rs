//! Process-shared building blocks of the smartx transport.
//!
//! Everything in this crate is designed to live inside a named shared-memory
//! region and be touched concurrently by the router process and the plugin
//! process: a robust, priority-inheriting mutex; a monotonic-clock condition
//! variable; a named-object allocator over a shm mapping; a FIFO based
//! one-bit signal; and the per-period metadata factory.

pub mod allocator;
pub mod condvar;
pub mod fdsignal;
pub mod metadata;
pub mod mutex;
pub mod paths;

pub use allocator::{Backing, MemoryAllocator, OpenFlag, ShmError};
pub use condvar::{CondVarError, ProcessCondVar};
pub use fdsignal::{FdSignal, FdSignalError, FdSignalMode};
pub use metadata::{MetaData, MetaDataFactory, MetaDataHeader, UserMetaDataFactory};
pub use mutex::{MutexError, RobustMutex};

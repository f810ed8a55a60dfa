//! PCM ring buffers of the smartx transport.
//!
//! A *real* buffer owns its storage, typically inside a named shared-memory
//! region, and coordinates one reader and one writer across processes. A
//! *mirror* buffer exposes the same access protocol while delegating to the
//! mmap interface of an actual PCM device. The factory constructs either
//! kind and locates previously created shared buffers by name.

pub mod buffer;
pub mod device;
pub mod factory;
pub mod mirror;
pub mod real;

pub use buffer::{RingBuffer, StreamingState};
pub use device::{PcmDevice, PcmState};
pub use factory::{RingBufferFactory, RingBufferType};
pub use real::{RingBufferError, RingBufferReal};

/// Monotonic clock in microseconds, the timebase of the access timestamps.
pub(crate) fn monotonic_micros() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1_000_000 + ts.tv_nsec as u64 / 1_000
}

//! Abstraction over the host framework's PCM device, as required by the
//! mirror buffer. The production implementation wraps the framework's
//! device handle; tests substitute a fake.

use smartx_common::{AudioArea, SampleFormat};

/// Device states of the framework's PCM state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmState {
    Open,
    Setup,
    Prepared,
    Running,
    Xrun,
    Draining,
    Paused,
    Suspended,
    Disconnected,
}

/// Frame window granted by `mmap_begin`.
#[derive(Debug, Clone)]
pub struct MmapChunk {
    pub areas: Vec<AudioArea>,
    pub offset: u32,
    pub frames: u32,
}

/// The subset of the PCM device interface the mirror buffer drives.
///
/// Methods returning `i32` use the framework's errno convention: `0` (or a
/// non-negative count) on success, a negative errno otherwise.
pub trait PcmDevice: Send {
    fn state(&mut self) -> PcmState;

    /// Number of available frames (free for playback, filled for capture),
    /// or a negative errno.
    fn avail_update(&mut self) -> i64;

    fn start(&mut self) -> i32;

    /// Block until the device can move at least one period or the timeout
    /// expires: `0` on timeout, positive on success, negative errno on error.
    fn wait(&mut self, timeout_ms: i32) -> i32;

    fn prepare(&mut self) -> i32;

    /// Resume from suspend; may return `-EAGAIN` while the suspend flag is
    /// still set.
    fn resume(&mut self) -> i32;

    /// Map a window of up to `frames` frames for direct access.
    fn mmap_begin(&mut self, frames: u32) -> Result<MmapChunk, i32>;

    /// Commit `frames` frames at `offset`; returns the committed count or a
    /// negative errno.
    fn mmap_commit(&mut self, offset: u32, frames: u32) -> i64;

    fn current_format(&mut self) -> Result<SampleFormat, i32>;

    fn name(&self) -> &str;
}

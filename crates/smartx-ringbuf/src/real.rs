//! The in-shared-memory PCM ring buffer.
//!
//! The record is `#[repr(C)]` and placed into a shared region by the
//! factory; reader and writer live in different processes. Accesses of the
//! same direction are serialised by a per-direction in-progress mutex;
//! reads and writes progress concurrently, coordinated only by
//! `buffer_level` under the master mutex. The hardware-pointer pair, the
//! access timestamps and the transferred-frame counters are updated in the
//! same critical section that advances the offsets, so an observer always
//! sees a consistent tuple.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use smartx_common::{AudioTimestamp, RingBufferAccess, SampleFormat};
use smartx_shm::{CondVarError, MutexError, ProcessCondVar, RobustMutex};

use crate::monotonic_micros;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RingBufferError {
    #[error("invalid parameter")]
    InvalidParam,
    #[error("ring buffer is not initialized")]
    NotInitialized,
    #[error("operation not allowed on this buffer")]
    NotAllowed,
    #[error("unsupported sample size")]
    InvalidSampleSize,
    #[error("wait timed out")]
    Timeout,
    #[error("condition wait failed: {0}")]
    CondWaitFailed(CondVarError),
    #[error("mutex operation failed: {0}")]
    MutexFailed(MutexError),
    #[error("device is in xrun and recovery failed")]
    PcmXrun,
    #[error("device is suspended and recovery failed")]
    PcmSuspend,
    #[error("device error")]
    PcmError,
}

impl From<MutexError> for RingBufferError {
    fn from(e: MutexError) -> Self {
        RingBufferError::MutexFailed(e)
    }
}

/// Gate that stops one transfer direction while the stream is not running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StreamingStateWire {
    Running = 1,
    StopWrite = 2,
    StopRead = 3,
}

/// Effects of an `end_access` the caller has to apply outside the record:
/// whether the peer-facing FD signal may fire, and for which side.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndAccessEffects {
    /// `Some(direction)` when the post-state of this `end_access` satisfies
    /// the `avail_min` condition of the peer waiting on the given side.
    /// The caller applies the device-type gate and fires the FD signal.
    pub fd_hint: Option<RingBufferAccess>,
}

#[repr(C)]
struct RealState {
    read_offset: u32,
    write_offset: u32,
    buffer_level: u32,
    read_wait_level: u32,
    write_wait_level: u32,
    timestamp_read: AudioTimestamp,
    timestamp_write: AudioTimestamp,
    streaming_state: i32,
    avail_min: u32,
    hw_ptr_read: i64,
    hw_ptr_write: i64,
    boundary: u64,
}

/// Shared-memory resident ring buffer record.
#[repr(C)]
pub struct RingBufferReal {
    period_size: u32,
    num_periods: u32,
    num_channels: u32,
    data_format: i32,
    sample_size: u32,
    shared: u8,
    initialized: u8,
    /// Byte offset from this record to the PCM data region; both live in
    /// the same mapping, so the offset is valid in every address space.
    data_offset: i64,
    read_in_progress: AtomicBool,
    write_in_progress: AtomicBool,
    mutex: RobustMutex,
    mutex_read_in_progress: RobustMutex,
    mutex_write_in_progress: RobustMutex,
    cond_read: ProcessCondVar,
    cond_write: ProcessCondVar,
    state: UnsafeCell<RealState>,
}

unsafe impl Send for RingBufferReal {}
unsafe impl Sync for RingBufferReal {}

impl RingBufferReal {
    /// Initialize the record in place; called by the factory on the
    /// creating side.
    ///
    /// # Safety
    /// `this` must point to zeroed memory valid for a `RingBufferReal` in
    /// the same mapping as the data region `data_offset` points to, and no
    /// other process may access it yet.
    pub unsafe fn init_in_place(
        this: *mut RingBufferReal,
        period_size: u32,
        num_periods: u32,
        num_channels: u32,
        data_format: SampleFormat,
        data_offset: i64,
        shared: bool,
    ) -> Result<(), RingBufferError> {
        if period_size == 0 || num_periods == 0 || num_channels == 0 {
            return Err(RingBufferError::InvalidParam);
        }
        unsafe {
            RobustMutex::init_in_place(std::ptr::addr_of_mut!((*this).mutex))?;
            RobustMutex::init_in_place(std::ptr::addr_of_mut!((*this).mutex_read_in_progress))?;
            RobustMutex::init_in_place(std::ptr::addr_of_mut!((*this).mutex_write_in_progress))?;
            ProcessCondVar::init_in_place(std::ptr::addr_of_mut!((*this).cond_read))
                .map_err(RingBufferError::CondWaitFailed)?;
            ProcessCondVar::init_in_place(std::ptr::addr_of_mut!((*this).cond_write))
                .map_err(RingBufferError::CondWaitFailed)?;

            (*this).period_size = period_size;
            (*this).num_periods = num_periods;
            (*this).num_channels = num_channels;
            (*this).data_format = data_format as i32;
            (*this).sample_size = data_format.sample_size() as u32;
            (*this).shared = shared as u8;
            (*this).data_offset = data_offset;
            (*this).read_in_progress = AtomicBool::new(false);
            (*this).write_in_progress = AtomicBool::new(false);

            let state = (*this).state.get();
            (*state).streaming_state = StreamingStateWire::Running as i32;
            // Same start value as the alsa-lib default: the largest power-of
            // two multiple of the buffer size a signed frame counter holds.
            let span = period_size as u64 * num_periods as u64;
            let mut boundary = span;
            while boundary * 2 <= i64::MAX as u64 - span {
                boundary *= 2;
            }
            (*state).boundary = boundary;

            (*this).initialized = 1;
        }
        Ok(())
    }

    /// Release the process-shared primitives; creator side only.
    ///
    /// # Safety
    /// No process may use the record concurrently.
    pub unsafe fn destroy_in_place(this: *mut RingBufferReal) {
        unsafe {
            ProcessCondVar::destroy_in_place(std::ptr::addr_of_mut!((*this).cond_write));
            ProcessCondVar::destroy_in_place(std::ptr::addr_of_mut!((*this).cond_read));
            RobustMutex::destroy_in_place(std::ptr::addr_of_mut!((*this).mutex_write_in_progress));
            RobustMutex::destroy_in_place(std::ptr::addr_of_mut!((*this).mutex_read_in_progress));
            RobustMutex::destroy_in_place(std::ptr::addr_of_mut!((*this).mutex));
            (*this).initialized = 0;
        }
    }

    #[allow(clippy::mut_from_ref)]
    fn state(&self) -> &mut RealState {
        // All mutations happen under the master mutex or the respective
        // in-progress mutex; see the access protocol below.
        unsafe { &mut *self.state.get() }
    }

    fn check_initialized(&self) -> Result<(), RingBufferError> {
        if self.initialized == 0 {
            return Err(RingBufferError::NotInitialized);
        }
        Ok(())
    }

    #[inline]
    fn capacity(&self) -> u32 {
        self.period_size * self.num_periods
    }

    pub fn period_size(&self) -> u32 {
        self.period_size
    }

    pub fn num_periods(&self) -> u32 {
        self.num_periods
    }

    pub fn num_channels(&self) -> u32 {
        self.num_channels
    }

    pub fn sample_size(&self) -> u32 {
        self.sample_size
    }

    pub fn data_format(&self) -> Result<SampleFormat, RingBufferError> {
        SampleFormat::from_wire(self.data_format).ok_or(RingBufferError::InvalidSampleSize)
    }

    pub fn data_ptr(&self) -> *mut u8 {
        unsafe { (self as *const RingBufferReal as *mut u8).offset(self.data_offset as isize) }
    }

    pub fn read_offset(&self) -> u32 {
        self.state().read_offset
    }

    pub fn write_offset(&self) -> u32 {
        self.state().write_offset
    }

    pub fn hw_ptr_read(&self) -> i64 {
        self.state().hw_ptr_read
    }

    pub fn hw_ptr_write(&self) -> i64 {
        self.state().hw_ptr_write
    }

    pub fn streaming_state(&self) -> StreamingStateWire {
        match self.state().streaming_state {
            2 => StreamingStateWire::StopWrite,
            3 => StreamingStateWire::StopRead,
            _ => StreamingStateWire::Running,
        }
    }

    pub fn set_streaming_state(&self, state: StreamingStateWire) {
        self.state().streaming_state = state as i32;
    }

    pub fn set_avail_min(&self, avail_min: u32) {
        self.state().avail_min = avail_min;
    }

    pub fn avail_min(&self) -> u32 {
        self.state().avail_min
    }

    /// Reset the hardware pointers for a boundary announced by the host
    /// framework. The write pointer is primed with `avail_min` so a capture
    /// application sees the correct initial availability instead of
    /// deadlocking against the router.
    pub fn set_boundary(&self, boundary: u64) {
        let state = self.state();
        state.boundary = boundary;
        state.hw_ptr_read = 0;
        state.hw_ptr_write = state.avail_min as i64;
    }

    pub fn boundary(&self) -> u64 {
        self.state().boundary
    }

    /// Frames currently available for the given access direction.
    pub fn update_available(&self, access: RingBufferAccess) -> Result<u32, RingBufferError> {
        self.check_initialized()?;
        let _guard = self.mutex.guard()?;
        let level = self.state().buffer_level;
        Ok(match access {
            RingBufferAccess::Read => level,
            RingBufferAccess::Write => self.capacity() - level,
        })
    }

    /// Open an access window. Clamps `frames` to the cyclically available
    /// count and to the linear run until wrap-around, and returns the
    /// direction's current offset. Refuses while another access of the same
    /// direction is in progress.
    pub fn begin_access(
        &self,
        access: RingBufferAccess,
        frames: &mut u32,
    ) -> Result<u32, RingBufferError> {
        self.check_initialized()?;
        let capacity = self.capacity();
        match access {
            RingBufferAccess::Read => {
                if self.read_in_progress.load(Ordering::Acquire) {
                    return Err(RingBufferError::NotAllowed);
                }
                self.read_in_progress.store(true, Ordering::Release);
                self.mutex_read_in_progress.lock()?;
                let state = self.state();
                let offset = state.read_offset;
                if state.streaming_state == StreamingStateWire::StopRead as i32 {
                    *frames = 0;
                } else {
                    if *frames > state.buffer_level {
                        *frames = state.buffer_level;
                    }
                    if state.read_offset + *frames >= capacity {
                        *frames = capacity - state.read_offset;
                    }
                }
                Ok(offset)
            }
            RingBufferAccess::Write => {
                if self.write_in_progress.load(Ordering::Acquire) {
                    return Err(RingBufferError::NotAllowed);
                }
                self.write_in_progress.store(true, Ordering::Release);
                self.mutex_write_in_progress.lock()?;
                let state = self.state();
                let offset = state.write_offset;
                if state.streaming_state == StreamingStateWire::StopWrite as i32 {
                    *frames = 0;
                } else {
                    let free = capacity - state.buffer_level;
                    if *frames > free {
                        *frames = free;
                    }
                    if state.write_offset + *frames >= capacity {
                        *frames = capacity - state.write_offset;
                    }
                }
                Ok(offset)
            }
        }
    }

    /// Close an access window after `frames` frames were transferred.
    ///
    /// Advances offset, level, hardware pointer, timestamp and frame
    /// counter in one critical section, signals the opposite side's condvar
    /// when its wait level is crossed, and reports through
    /// [`EndAccessEffects`] whether the FD signal condition holds. Must be
    /// called on every path that called `begin_access`, including error
    /// paths (with `frames == 0`), or the in-progress lock leaks.
    pub fn end_access(
        &self,
        access: RingBufferAccess,
        _offset: u32,
        frames: u32,
    ) -> Result<EndAccessEffects, RingBufferError> {
        let capacity = self.capacity();
        let mut effects = EndAccessEffects::default();
        match access {
            RingBufferAccess::Read => {
                if !self.read_in_progress.load(Ordering::Acquire) {
                    return Ok(effects);
                }
                let state = self.state();
                if (state.buffer_level as i64 - frames as i64) < 0 {
                    return Err(RingBufferError::InvalidParam);
                }
                let guard = self.mutex.guard()?;
                if state.read_offset + frames == capacity {
                    state.read_offset = 0;
                } else if state.read_offset + frames > capacity {
                    return Err(RingBufferError::InvalidParam);
                } else {
                    state.read_offset += frames;
                }
                state.buffer_level -= frames;
                state.hw_ptr_read += frames as i64;
                if state.hw_ptr_read as u64 >= state.boundary {
                    state.hw_ptr_read -= state.boundary as i64;
                }
                state.timestamp_read.timestamp_us = monotonic_micros();
                state.timestamp_read.num_transmitted_frames += frames as u64;

                self.read_in_progress.store(false, Ordering::Release);
                self.mutex_read_in_progress.unlock()?;
                if state.buffer_level <= state.write_wait_level {
                    let _ = self.cond_write.signal();
                }
                if frames > 0 && (capacity - state.buffer_level) >= state.avail_min {
                    effects.fd_hint = Some(RingBufferAccess::Read);
                }
                drop(guard);
            }
            RingBufferAccess::Write => {
                if !self.write_in_progress.load(Ordering::Acquire) {
                    return Ok(effects);
                }
                let state = self.state();
                if state.buffer_level + frames > capacity {
                    return Err(RingBufferError::InvalidParam);
                }
                let guard = self.mutex.guard()?;
                if state.write_offset + frames == capacity {
                    state.write_offset = 0;
                } else if state.write_offset + frames > capacity {
                    return Err(RingBufferError::InvalidParam);
                } else {
                    state.write_offset += frames;
                }
                state.buffer_level += frames;
                state.hw_ptr_write += frames as i64;
                if state.hw_ptr_write as u64 >= state.boundary {
                    state.hw_ptr_write -= state.boundary as i64;
                }
                state.timestamp_write.timestamp_us = monotonic_micros();
                state.timestamp_write.num_transmitted_frames += frames as u64;

                self.write_in_progress.store(false, Ordering::Release);
                self.mutex_write_in_progress.unlock()?;
                if state.buffer_level >= state.read_wait_level {
                    let _ = self.cond_read.signal();
                }
                if frames > 0 && state.buffer_level >= state.avail_min {
                    effects.fd_hint = Some(RingBufferAccess::Write);
                }
                drop(guard);
            }
        }
        Ok(effects)
    }

    /// Block until at least `num_periods` periods are readable.
    pub fn wait_read(&self, num_periods: u32, timeout_ms: u32) -> Result<(), RingBufferError> {
        if num_periods > self.num_periods || num_periods == 0 || timeout_ms == 0 {
            return Err(RingBufferError::InvalidParam);
        }
        let guard = self.mutex.guard()?;
        let state = self.state();
        state.read_wait_level = num_periods * self.period_size;
        let mut result = Ok(());
        if state.buffer_level < state.read_wait_level {
            result = match self.cond_read.wait_timeout(&self.mutex, timeout_ms as u64) {
                Ok(()) => Ok(()),
                Err(CondVarError::Timeout) => Err(RingBufferError::Timeout),
                Err(e) => Err(RingBufferError::CondWaitFailed(e)),
            };
        }
        drop(guard);
        result
    }

    /// Block until at least `num_periods` periods are writable.
    pub fn wait_write(&self, num_periods: u32, timeout_ms: u32) -> Result<(), RingBufferError> {
        if num_periods > self.num_periods || num_periods == 0 || timeout_ms == 0 {
            return Err(RingBufferError::InvalidParam);
        }
        let guard = self.mutex.guard()?;
        let state = self.state();
        state.write_wait_level = (self.num_periods - num_periods) * self.period_size;
        let mut result = Ok(());
        if state.buffer_level > state.write_wait_level {
            result = match self.cond_write.wait_timeout(&self.mutex, timeout_ms as u64) {
                Ok(()) => Ok(()),
                Err(CondVarError::Timeout) => Err(RingBufferError::Timeout),
                Err(e) => Err(RingBufferError::CondWaitFailed(e)),
            };
        }
        drop(guard);
        result
    }

    /// Timestamp and cumulative frame count of the given direction.
    pub fn timestamp(&self, access: RingBufferAccess) -> Result<AudioTimestamp, RingBufferError> {
        let _guard = self.mutex.guard()?;
        let state = self.state();
        Ok(match access {
            RingBufferAccess::Read => state.timestamp_read,
            RingBufferAccess::Write => state.timestamp_write,
        })
    }

    /// Zero both offsets and the level. Holds the reader's in-progress
    /// mutex so no read access is concurrently touching the pointers.
    pub fn reset_from_writer(&self) -> Result<(), RingBufferError> {
        self.mutex_read_in_progress.lock()?;
        let state = self.state();
        state.read_offset = 0;
        state.write_offset = 0;
        state.buffer_level = 0;
        self.mutex_read_in_progress.unlock()?;
        Ok(())
    }

    /// Zero both offsets and the level. Holds the writer's in-progress
    /// mutex so no write access is concurrently touching the pointers.
    pub fn reset_from_reader(&self) -> Result<(), RingBufferError> {
        self.mutex_write_in_progress.lock()?;
        let state = self.state();
        state.read_offset = 0;
        state.write_offset = 0;
        state.buffer_level = 0;
        self.mutex_write_in_progress.unlock()?;
        Ok(())
    }

    /// Overwrite the data region with zeros without changing any pointer or
    /// level. Holds both in-progress mutexes.
    pub fn zero_out(&self) -> Result<(), RingBufferError> {
        self.mutex_read_in_progress.lock()?;
        self.mutex_write_in_progress.lock()?;
        let bytes =
            self.capacity() as usize * self.num_channels as usize * self.sample_size as usize;
        unsafe { std::ptr::write_bytes(self.data_ptr(), 0, bytes) };
        self.mutex_write_in_progress.unlock()?;
        self.mutex_read_in_progress.unlock()?;
        Ok(())
    }

    pub fn buffer_level(&self) -> u32 {
        self.state().buffer_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;

    struct TestBuffer {
        record: Box<RingBufferReal>,
        // Keeps the data region alive; the record addresses it by offset.
        _data: Box<[u8]>,
    }

    fn make_buffer(period_size: u32, num_periods: u32, channels: u32) -> TestBuffer {
        let data_len =
            (period_size * num_periods * channels) as usize * SampleFormat::Float32.sample_size();
        let data: Box<[u8]> = vec![0u8; data_len].into_boxed_slice();
        let mut record: Box<MaybeUninit<RingBufferReal>> = Box::new(MaybeUninit::zeroed());
        let record_ptr = record.as_mut_ptr();
        let offset = data.as_ptr() as i64 - record_ptr as i64;
        unsafe {
            RingBufferReal::init_in_place(
                record_ptr,
                period_size,
                num_periods,
                channels,
                SampleFormat::Float32,
                offset,
                false,
            )
            .unwrap();
            TestBuffer {
                record: Box::from_raw(Box::into_raw(record) as *mut RingBufferReal),
                _data: data,
            }
        }
    }

    #[test]
    fn empty_buffer_availability() {
        let buf = make_buffer(64, 4, 2);
        assert_eq!(buf.record.update_available(RingBufferAccess::Read).unwrap(), 0);
        assert_eq!(
            buf.record.update_available(RingBufferAccess::Write).unwrap(),
            256
        );
    }

    #[test]
    fn write_then_read_accounting() {
        let buf = make_buffer(64, 4, 2);
        let rb = &buf.record;

        let mut frames = 64;
        let offset = rb.begin_access(RingBufferAccess::Write, &mut frames).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(frames, 64);
        rb.end_access(RingBufferAccess::Write, offset, frames).unwrap();

        assert_eq!(rb.update_available(RingBufferAccess::Read).unwrap(), 64);
        assert_eq!(rb.update_available(RingBufferAccess::Write).unwrap(), 192);
        assert_eq!(rb.hw_ptr_write(), 64);

        let mut frames = 64;
        let offset = rb.begin_access(RingBufferAccess::Read, &mut frames).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(frames, 64);
        rb.end_access(RingBufferAccess::Read, offset, frames).unwrap();
        assert_eq!(rb.buffer_level(), 0);
        assert_eq!(rb.hw_ptr_read(), 64);
    }

    #[test]
    fn begin_access_clamps_at_wrap() {
        let buf = make_buffer(64, 4, 1);
        let rb = &buf.record;

        // Fill the buffer, read 32 frames, then write again: the write
        // window must stop at the wrap-around point.
        for _ in 0..4 {
            let mut frames = 64;
            let o = rb.begin_access(RingBufferAccess::Write, &mut frames).unwrap();
            rb.end_access(RingBufferAccess::Write, o, frames).unwrap();
        }
        let mut frames = 32;
        let o = rb.begin_access(RingBufferAccess::Read, &mut frames).unwrap();
        rb.end_access(RingBufferAccess::Read, o, frames).unwrap();

        let mut frames = 64;
        let offset = rb.begin_access(RingBufferAccess::Write, &mut frames).unwrap();
        // Write offset is at 0 after wrapping; 32 frames are free.
        assert_eq!(offset, 0);
        assert_eq!(frames, 32);
        rb.end_access(RingBufferAccess::Write, offset, frames).unwrap();
    }

    #[test]
    fn second_access_same_direction_is_refused() {
        let buf = make_buffer(64, 4, 1);
        let rb = &buf.record;
        let mut frames = 64;
        let offset = rb.begin_access(RingBufferAccess::Write, &mut frames).unwrap();
        let mut more = 64;
        assert_eq!(
            rb.begin_access(RingBufferAccess::Write, &mut more).unwrap_err(),
            RingBufferError::NotAllowed
        );
        rb.end_access(RingBufferAccess::Write, offset, frames).unwrap();
    }

    #[test]
    fn stop_read_gates_reader() {
        let buf = make_buffer(64, 4, 1);
        let rb = &buf.record;
        let mut frames = 64;
        let o = rb.begin_access(RingBufferAccess::Write, &mut frames).unwrap();
        rb.end_access(RingBufferAccess::Write, o, frames).unwrap();

        rb.set_streaming_state(StreamingStateWire::StopRead);
        let mut frames = 64;
        let o = rb.begin_access(RingBufferAccess::Read, &mut frames).unwrap();
        assert_eq!(frames, 0);
        rb.end_access(RingBufferAccess::Read, o, 0).unwrap();

        rb.set_streaming_state(StreamingStateWire::Running);
        let mut frames = 64;
        rb.begin_access(RingBufferAccess::Read, &mut frames).unwrap();
        assert_eq!(frames, 64);
        rb.end_access(RingBufferAccess::Read, 0, frames).unwrap();
    }

    #[test]
    fn boundary_priming_for_capture() {
        let buf = make_buffer(64, 4, 1);
        let rb = &buf.record;
        rb.set_avail_min(64);
        rb.set_boundary(1 << 30);
        assert_eq!(rb.hw_ptr_read(), 0);
        assert_eq!(rb.hw_ptr_write(), 64);
        assert_eq!(rb.boundary(), 1 << 30);
    }

    #[test]
    fn fd_hint_respects_avail_min() {
        let buf = make_buffer(64, 4, 1);
        let rb = &buf.record;
        rb.set_avail_min(128);

        let mut frames = 64;
        let o = rb.begin_access(RingBufferAccess::Write, &mut frames).unwrap();
        let effects = rb.end_access(RingBufferAccess::Write, o, frames).unwrap();
        // Only 64 frames filled, avail_min is 128: no wakeup for a sink.
        assert_eq!(effects.fd_hint, None);

        let mut frames = 64;
        let o = rb.begin_access(RingBufferAccess::Write, &mut frames).unwrap();
        let effects = rb.end_access(RingBufferAccess::Write, o, frames).unwrap();
        assert_eq!(effects.fd_hint, Some(RingBufferAccess::Write));
    }

    #[test]
    fn reset_clears_levels() {
        let buf = make_buffer(64, 4, 1);
        let rb = &buf.record;
        let mut frames = 64;
        let o = rb.begin_access(RingBufferAccess::Write, &mut frames).unwrap();
        rb.end_access(RingBufferAccess::Write, o, frames).unwrap();
        rb.reset_from_writer().unwrap();
        assert_eq!(rb.buffer_level(), 0);
        assert_eq!(rb.read_offset(), 0);
        assert_eq!(rb.write_offset(), 0);
    }

    #[test]
    fn end_access_overflow_is_rejected() {
        let buf = make_buffer(64, 2, 1);
        let rb = &buf.record;
        let mut frames = 64;
        let o = rb.begin_access(RingBufferAccess::Write, &mut frames).unwrap();
        // Claiming more frames than fit must fail.
        assert_eq!(
            rb.end_access(RingBufferAccess::Write, o, 129).unwrap_err(),
            RingBufferError::InvalidParam
        );
        rb.end_access(RingBufferAccess::Write, o, frames).unwrap();
    }

    #[test]
    fn wait_read_returns_immediately_when_filled() {
        let buf = make_buffer(64, 4, 1);
        let rb = &buf.record;
        let mut frames = 64;
        let o = rb.begin_access(RingBufferAccess::Write, &mut frames).unwrap();
        rb.end_access(RingBufferAccess::Write, o, frames).unwrap();
        rb.wait_read(1, 100).unwrap();
    }

    #[test]
    fn wait_read_times_out_when_empty() {
        let buf = make_buffer(64, 4, 1);
        assert_eq!(
            buf.record.wait_read(1, 30).unwrap_err(),
            RingBufferError::Timeout
        );
    }

    #[test]
    fn conservation_across_threads() {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::sync::Arc;

        let buf = Arc::new(make_buffer(32, 8, 1));
        let written = Arc::new(AtomicU64::new(0));
        let read = Arc::new(AtomicU64::new(0));

        let writer = {
            let buf = Arc::clone(&buf);
            let written = Arc::clone(&written);
            std::thread::spawn(move || {
                let rb = &buf.record;
                let mut total = 0u64;
                while total < 4096 {
                    let mut frames = (4096 - total).min(32) as u32;
                    let o = rb.begin_access(RingBufferAccess::Write, &mut frames).unwrap();
                    rb.end_access(RingBufferAccess::Write, o, frames).unwrap();
                    total += frames as u64;
                    if frames == 0 {
                        std::thread::yield_now();
                    }
                }
                written.store(total, Ordering::Release);
            })
        };
        let reader = {
            let buf = Arc::clone(&buf);
            let read = Arc::clone(&read);
            std::thread::spawn(move || {
                let rb = &buf.record;
                let mut total = 0u64;
                while total < 4096 {
                    let mut frames = (4096 - total).min(32) as u32;
                    let o = rb.begin_access(RingBufferAccess::Read, &mut frames).unwrap();
                    rb.end_access(RingBufferAccess::Read, o, frames).unwrap();
                    total += frames as u64;
                    if frames == 0 {
                        std::thread::yield_now();
                    }
                }
                read.store(total, Ordering::Release);
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();

        // Everything written has been read; the level reflects the balance.
        let rb = &buf.record;
        assert_eq!(
            written.load(Ordering::Acquire) - read.load(Ordering::Acquire),
            rb.buffer_level() as u64
        );
        assert_eq!(rb.timestamp(RingBufferAccess::Write).unwrap().num_transmitted_frames, 4096);
        assert_eq!(rb.timestamp(RingBufferAccess::Read).unwrap().num_transmitted_frames, 4096);
    }
}

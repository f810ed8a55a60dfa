//! Ring buffer facade over an actual PCM device.
//!
//! The mirror exposes the real buffer's access protocol while delegating
//! storage and progress to the device's mmap interface. `update_available`
//! implements the direct-access loop of the framework's example code:
//! recover from XRUN/SUSPEND, query availability, start the device on the
//! first loop, otherwise wait until the device can move a period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{error, info, warn};

use smartx_common::{AudioArea, AudioTimestamp, SampleFormat};

use crate::device::{PcmDevice, PcmState};
use crate::monotonic_micros;
use crate::real::RingBufferError;

const LOG: &str = "ringbuf";

/// Throttle for timeout logging: one message per this many timeouts.
const TIMEOUT_LOG_INTERVAL: u32 = 50;

pub struct RingBufferMirror {
    device: Option<Box<dyn PcmDevice>>,
    num_channels: u32,
    initialized: bool,
    access_in_progress: AtomicBool,
    first_loop: bool,
    period_size: u32,
    timeout_ms: i32,
    non_block: bool,
    num_transmitted_frames: u64,
    timestamp: AudioTimestamp,
    timeout_cnt: u32,
}

impl RingBufferMirror {
    pub fn new(num_channels: u32) -> Result<Self, RingBufferError> {
        if num_channels == 0 {
            return Err(RingBufferError::InvalidParam);
        }
        Ok(RingBufferMirror {
            device: None,
            num_channels,
            initialized: true,
            access_in_progress: AtomicBool::new(false),
            first_loop: true,
            period_size: 0,
            timeout_ms: -1,
            non_block: false,
            num_transmitted_frames: 0,
            timestamp: AudioTimestamp::default(),
            timeout_cnt: 0,
        })
    }

    pub fn set_device(
        &mut self,
        device: Box<dyn PcmDevice>,
        period_size: u32,
        timeout_ms: u32,
    ) -> Result<(), RingBufferError> {
        self.device = Some(device);
        self.period_size = period_size;
        self.timeout_ms = timeout_ms as i32;
        self.first_loop = true;
        Ok(())
    }

    pub fn clear_device(&mut self) {
        self.device = None;
    }

    pub fn set_non_block(&mut self, non_block: bool) {
        self.non_block = non_block;
        info!(
            target: LOG,
            "mirror set to {} mode",
            if non_block { "non-blocking" } else { "blocking" }
        );
    }

    pub fn num_channels(&self) -> u32 {
        self.num_channels
    }

    pub fn data_format(&mut self) -> Result<SampleFormat, RingBufferError> {
        let device = self.device.as_mut().ok_or(RingBufferError::NotInitialized)?;
        device.current_format().map_err(|_| RingBufferError::PcmError)
    }

    pub fn timestamp(&self) -> AudioTimestamp {
        self.timestamp
    }

    /// Underrun / suspend recovery, as in the framework's direct-access
    /// example: EPIPE re-prepares; ESTRPIPE resumes (retrying while the
    /// suspend flag is held) and falls back to prepare.
    fn xrun_recovery(&mut self, err: i32) -> i32 {
        let Some(device) = self.device.as_mut() else {
            return -libc::EBADFD;
        };
        if err == -libc::EPIPE {
            return device.prepare();
        }
        if err == -libc::ESTRPIPE {
            loop {
                let rc = device.resume();
                if rc != -libc::EAGAIN {
                    if rc < 0 {
                        let rc = device.prepare();
                        if rc < 0 {
                            return -1;
                        }
                    }
                    return 0;
                }
                std::thread::sleep(Duration::from_secs(1));
            }
        }
        err
    }

    /// Wait until the device can move at least one period and return the
    /// available frame count.
    pub fn update_available(&mut self) -> Result<u32, RingBufferError> {
        if !self.initialized || self.device.is_none() {
            error!(target: LOG, "mirror not initialized or no device set");
            return Err(RingBufferError::NotInitialized);
        }

        let mut samples;
        loop {
            let state = self.device.as_mut().expect("device checked above").state();
            if state == PcmState::Xrun {
                error!(target: LOG, "device in xrun, trying to recover");
                if self.xrun_recovery(-libc::EPIPE) < 0 {
                    error!(target: LOG, "xrun recovery failed");
                    return Err(RingBufferError::PcmXrun);
                }
                self.first_loop = true;
            } else if state == PcmState::Suspended {
                error!(target: LOG, "device suspended, trying to recover");
                if self.xrun_recovery(-libc::ESTRPIPE) < 0 {
                    error!(target: LOG, "suspend recovery failed");
                    return Err(RingBufferError::PcmSuspend);
                }
            }

            let avail = self.device.as_mut().expect("device checked above").avail_update();
            if avail >= 0 {
                samples = avail as u32;
            } else {
                error!(target: LOG, "avail_update failed, trying to recover");
                if self.xrun_recovery(avail as i32) < 0 {
                    error!(target: LOG, "avail_update recovery failed");
                    return Err(RingBufferError::PcmError);
                }
                self.first_loop = true;
                continue;
            }

            if samples >= self.period_size {
                break;
            }

            if self.first_loop {
                self.first_loop = false;
                let device = self.device.as_mut().expect("device checked above");
                if device.state() != PcmState::Running {
                    let rc = device.start();
                    if rc < 0 {
                        error!(target: LOG, "device start failed (errno {rc})");
                        return Err(RingBufferError::PcmError);
                    }
                    info!(target: LOG, "device started");
                }
            } else {
                if self.non_block {
                    break;
                }
                let timeout = self.timeout_ms;
                let rc = self.device.as_mut().expect("device checked above").wait(timeout);
                if rc == 0 {
                    if self.timeout_cnt % TIMEOUT_LOG_INTERVAL == 0 {
                        error!(
                            target: LOG,
                            "device wait timed out after {timeout} ms ({} timeouts, {} frames free)",
                            self.timeout_cnt,
                            samples
                        );
                    }
                    self.timeout_cnt += 1;
                    return Err(RingBufferError::Timeout);
                }
                if rc < 0 {
                    warn!(target: LOG, "device wait failed (errno {rc}), trying to recover");
                    if self.xrun_recovery(rc) < 0 {
                        error!(target: LOG, "wait recovery failed");
                        return Err(RingBufferError::PcmError);
                    }
                    self.first_loop = true;
                }
            }
        }

        self.timestamp = AudioTimestamp {
            timestamp_us: monotonic_micros(),
            num_transmitted_frames: self.num_transmitted_frames,
        };
        Ok(samples)
    }

    /// Map a device window into `areas`; at most one access may be open.
    pub fn begin_access(
        &mut self,
        areas: &mut [AudioArea],
        offset: &mut u32,
        frames: &mut u32,
    ) -> Result<(), RingBufferError> {
        if !self.initialized || self.device.is_none() {
            return Err(RingBufferError::NotInitialized);
        }
        if self.access_in_progress.load(Ordering::Acquire) {
            error!(target: LOG, "device access already in progress");
            return Err(RingBufferError::NotAllowed);
        }
        let chunk = loop {
            let device = self.device.as_mut().expect("device checked above");
            match device.mmap_begin(*frames) {
                Ok(chunk) => break chunk,
                Err(rc) => {
                    error!(target: LOG, "mmap_begin failed (errno {rc}), trying to recover");
                    if self.xrun_recovery(rc) < 0 {
                        error!(target: LOG, "mmap_begin recovery failed");
                        return Err(RingBufferError::PcmError);
                    }
                    self.first_loop = true;
                }
            }
        };
        self.access_in_progress.store(true, Ordering::Release);
        for (i, area) in areas.iter_mut().enumerate().take(self.num_channels as usize) {
            let device_area = chunk.areas.get(i).copied().unwrap_or_default();
            *area = AudioArea {
                start: device_area.start,
                first_bit: device_area.first_bit,
                step_bits: device_area.step_bits,
                index: i as u32,
                max_index: self.num_channels - 1,
            };
        }
        *offset = chunk.offset;
        *frames = chunk.frames;
        Ok(())
    }

    /// Commit the mapped window. A short commit is treated as EPIPE and
    /// recovered, as the framework's example does.
    pub fn end_access(&mut self, offset: u32, frames: u32) -> Result<(), RingBufferError> {
        if !self.access_in_progress.load(Ordering::Acquire) {
            error!(target: LOG, "no access in progress, missing begin_access");
            return Err(RingBufferError::NotAllowed);
        }
        self.access_in_progress.store(false, Ordering::Release);
        self.num_transmitted_frames += frames as u64;

        let device = self.device.as_mut().ok_or(RingBufferError::NotInitialized)?;
        let mut rc = device.mmap_commit(offset, frames) as i32;
        if rc != frames as i32 {
            error!(target: LOG, "mmap_commit committed {rc} of {frames} frames");
            rc = -libc::EPIPE;
        }
        if rc < 0 {
            error!(target: LOG, "mmap_commit failed, trying to recover");
            if self.xrun_recovery(rc) < 0 {
                error!(target: LOG, "mmap_commit recovery failed");
                return Err(RingBufferError::PcmError);
            }
            self.first_loop = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MmapChunk;
    use smartx_common::area::make_interleaved_areas;

    /// Fake device: an interleaved stereo buffer of 4 periods driven like a
    /// playback device.
    struct FakeDevice {
        buffer: Vec<f32>,
        period_size: u32,
        num_periods: u32,
        appl_ptr: u32,
        hw_ptr: u32,
        state: PcmState,
        started: bool,
        fail_next_commit: bool,
        prepares: u32,
    }

    impl FakeDevice {
        fn new(period_size: u32, num_periods: u32) -> Self {
            FakeDevice {
                buffer: vec![0.0; (period_size * num_periods * 2) as usize],
                period_size,
                num_periods,
                appl_ptr: 0,
                hw_ptr: 0,
                state: PcmState::Prepared,
                started: false,
                fail_next_commit: false,
                prepares: 0,
            }
        }

        fn capacity(&self) -> u32 {
            self.period_size * self.num_periods
        }

        fn free(&self) -> u32 {
            self.capacity() - (self.appl_ptr.wrapping_sub(self.hw_ptr))
        }
    }

    impl PcmDevice for FakeDevice {
        fn state(&mut self) -> PcmState {
            self.state
        }

        fn avail_update(&mut self) -> i64 {
            self.free() as i64
        }

        fn start(&mut self) -> i32 {
            self.started = true;
            self.state = PcmState::Running;
            0
        }

        fn wait(&mut self, _timeout_ms: i32) -> i32 {
            // Pretend the device consumed one period while we waited.
            self.hw_ptr += self.period_size;
            1
        }

        fn prepare(&mut self) -> i32 {
            self.prepares += 1;
            self.state = PcmState::Prepared;
            self.appl_ptr = 0;
            self.hw_ptr = 0;
            0
        }

        fn resume(&mut self) -> i32 {
            self.state = PcmState::Prepared;
            0
        }

        fn mmap_begin(&mut self, frames: u32) -> Result<MmapChunk, i32> {
            let offset = self.appl_ptr % self.capacity();
            let granted = frames.min(self.free()).min(self.capacity() - offset);
            Ok(MmapChunk {
                areas: make_interleaved_areas(
                    self.buffer.as_mut_ptr() as *mut u8,
                    2,
                    SampleFormat::Float32,
                ),
                offset,
                frames: granted,
            })
        }

        fn mmap_commit(&mut self, _offset: u32, frames: u32) -> i64 {
            if self.fail_next_commit {
                self.fail_next_commit = false;
                return -libc::EPIPE as i64;
            }
            self.appl_ptr += frames;
            frames as i64
        }

        fn current_format(&mut self) -> Result<SampleFormat, i32> {
            Ok(SampleFormat::Float32)
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    #[test]
    fn full_device_waits_then_grants() {
        let mut mirror = RingBufferMirror::new(2).unwrap();
        mirror
            .set_device(Box::new(FakeDevice::new(64, 4)), 64, 100)
            .unwrap();

        // Fill the whole device buffer.
        for _ in 0..4 {
            let avail = mirror.update_available().unwrap();
            assert!(avail >= 64);
            let mut areas = vec![AudioArea::default(); 2];
            let mut offset = 0;
            let mut frames = 64;
            mirror.begin_access(&mut areas, &mut offset, &mut frames).unwrap();
            assert_eq!(frames, 64);
            mirror.end_access(offset, frames).unwrap();
        }
        // Buffer is full now; the next update has to go through start +
        // wait, after which one period is free again.
        let avail = mirror.update_available().unwrap();
        assert!(avail >= 64);
    }

    #[test]
    fn xrun_triggers_prepare() {
        let mut device = FakeDevice::new(64, 4);
        device.state = PcmState::Xrun;
        let mut mirror = RingBufferMirror::new(2).unwrap();
        mirror.set_device(Box::new(device), 64, 100).unwrap();
        let avail = mirror.update_available().unwrap();
        assert!(avail > 0);
    }

    #[test]
    fn double_begin_is_refused() {
        let mut mirror = RingBufferMirror::new(2).unwrap();
        mirror
            .set_device(Box::new(FakeDevice::new(64, 4)), 64, 100)
            .unwrap();
        let mut areas = vec![AudioArea::default(); 2];
        let mut offset = 0;
        let mut frames = 64;
        mirror.begin_access(&mut areas, &mut offset, &mut frames).unwrap();
        let mut frames2 = 64;
        let mut offset2 = 0;
        assert_eq!(
            mirror
                .begin_access(&mut areas, &mut offset2, &mut frames2)
                .unwrap_err(),
            RingBufferError::NotAllowed
        );
        mirror.end_access(offset, frames).unwrap();
    }

    #[test]
    fn short_commit_recovers() {
        let mut device = FakeDevice::new(64, 4);
        device.fail_next_commit = true;
        let mut mirror = RingBufferMirror::new(2).unwrap();
        mirror.set_device(Box::new(device), 64, 100).unwrap();

        let mut areas = vec![AudioArea::default(); 2];
        let mut offset = 0;
        let mut frames = 64;
        mirror.begin_access(&mut areas, &mut offset, &mut frames).unwrap();
        // The failed commit is coerced to EPIPE and recovered via prepare.
        mirror.end_access(offset, frames).unwrap();
    }

    #[test]
    fn missing_end_access_pairing() {
        let mut mirror = RingBufferMirror::new(2).unwrap();
        mirror
            .set_device(Box::new(FakeDevice::new(64, 4)), 64, 100)
            .unwrap();
        assert_eq!(
            mirror.end_access(0, 0).unwrap_err(),
            RingBufferError::NotAllowed
        );
    }
}

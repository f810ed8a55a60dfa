//! The ring-buffer facade handed out to the transport code.
//!
//! A buffer is either *real* (shared-memory record owned by the factory's
//! region) or *mirror* (delegating to a PCM device); operations that only
//! make sense on one arm reject the other with `NotAllowed`. The facade
//! also owns the per-channel area array and the process-local FD-signal
//! binding.

use std::ptr::NonNull;

use smartx_common::area::make_non_interleaved_areas;
use smartx_common::{AudioArea, AudioTimestamp, DeviceType, RingBufferAccess, SampleFormat};
use smartx_shm::FdSignal;

use crate::device::PcmDevice;
use crate::mirror::RingBufferMirror;
use crate::real::{RingBufferError, RingBufferReal, StreamingStateWire};

/// Streaming-state gate of a real buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingState {
    Running,
    StopWrite,
    StopRead,
}

impl From<StreamingState> for StreamingStateWire {
    fn from(s: StreamingState) -> Self {
        match s {
            StreamingState::Running => StreamingStateWire::Running,
            StreamingState::StopWrite => StreamingStateWire::StopWrite,
            StreamingState::StopRead => StreamingStateWire::StopRead,
        }
    }
}

impl From<StreamingStateWire> for StreamingState {
    fn from(s: StreamingStateWire) -> Self {
        match s {
            StreamingStateWire::Running => StreamingState::Running,
            StreamingStateWire::StopWrite => StreamingState::StopWrite,
            StreamingStateWire::StopRead => StreamingState::StopRead,
        }
    }
}

enum Kind {
    /// Record lives inside a factory-owned region; the pointer stays valid
    /// for the lifetime of that region.
    Real(NonNull<RingBufferReal>),
    Mirror(Box<RingBufferMirror>),
}

pub struct RingBuffer {
    kind: Kind,
    areas: Vec<AudioArea>,
    num_channels: u32,
    name: String,
    fd_signal: Option<NonNull<FdSignal>>,
    device_type: Option<DeviceType>,
}

unsafe impl Send for RingBuffer {}

impl RingBuffer {
    /// Wrap a freshly initialized real record.
    ///
    /// # Safety
    /// `real` must point to an initialized `RingBufferReal` that outlives
    /// the facade (the factory guarantees this by keeping the region
    /// allocator alive until the buffer is destroyed).
    pub(crate) unsafe fn from_real(real: NonNull<RingBufferReal>, name: &str) -> Result<Self, RingBufferError> {
        let record = unsafe { real.as_ref() };
        let num_channels = record.num_channels();
        if num_channels == 0 {
            return Err(RingBufferError::NotInitialized);
        }
        let areas = make_non_interleaved_areas(
            record.data_ptr(),
            num_channels,
            record.period_size() * record.num_periods(),
            record.data_format()?,
        );
        Ok(RingBuffer {
            kind: Kind::Real(real),
            areas,
            num_channels,
            name: name.to_string(),
            fd_signal: None,
            device_type: None,
        })
    }

    pub(crate) fn from_mirror(mirror: RingBufferMirror, name: &str) -> Self {
        let num_channels = mirror.num_channels();
        RingBuffer {
            kind: Kind::Mirror(Box::new(mirror)),
            areas: vec![AudioArea::default(); num_channels as usize],
            num_channels,
            name: name.to_string(),
            fd_signal: None,
            device_type: None,
        }
    }

    fn real(&self) -> Option<&RingBufferReal> {
        match &self.kind {
            Kind::Real(ptr) => Some(unsafe { ptr.as_ref() }),
            Kind::Mirror(_) => None,
        }
    }

    fn mirror_mut(&mut self) -> Option<&mut RingBufferMirror> {
        match &mut self.kind {
            Kind::Real(_) => None,
            Kind::Mirror(mirror) => Some(mirror),
        }
    }

    pub fn is_real(&self) -> bool {
        matches!(self.kind, Kind::Real(_))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn num_channels(&self) -> u32 {
        self.num_channels
    }

    pub fn period_size(&self) -> u32 {
        self.real().map(|r| r.period_size()).unwrap_or(0)
    }

    pub fn num_periods(&self) -> u32 {
        self.real().map(|r| r.num_periods()).unwrap_or(0)
    }

    pub fn data_format(&mut self) -> Result<SampleFormat, RingBufferError> {
        match &mut self.kind {
            Kind::Real(ptr) => unsafe { ptr.as_ref() }.data_format(),
            Kind::Mirror(mirror) => mirror.data_format(),
        }
    }

    /// Attach the device handle; mirror buffers only.
    pub fn set_device_handle(
        &mut self,
        device: Box<dyn PcmDevice>,
        period_size: u32,
        timeout_ms: u32,
    ) -> Result<(), RingBufferError> {
        match self.mirror_mut() {
            Some(mirror) => mirror.set_device(device, period_size, timeout_ms),
            None => Err(RingBufferError::NotAllowed),
        }
    }

    pub fn clear_device_handle(&mut self) {
        if let Some(mirror) = self.mirror_mut() {
            mirror.clear_device();
        }
    }

    /// Select blocking behaviour of the device loop; mirror buffers only.
    pub fn set_non_block_mode(&mut self, non_block: bool) -> Result<(), RingBufferError> {
        match self.mirror_mut() {
            Some(mirror) => {
                mirror.set_non_block(non_block);
                Ok(())
            }
            None => Err(RingBufferError::NotAllowed),
        }
    }

    pub fn set_avail_min(&self, avail_min: u32) {
        if let Some(real) = self.real() {
            real.set_avail_min(avail_min);
        }
    }

    pub fn set_boundary(&self, boundary: u64) {
        if let Some(real) = self.real() {
            real.set_boundary(boundary);
        }
    }

    /// Bind the FD signal fired towards the plugin's poll loop.
    ///
    /// The binding is process-local: only the process that owns the signal
    /// (the router) holds it, and only end-accesses matching `device_type`
    /// fire it.
    ///
    /// # Safety
    /// `fd_signal` must outlive this ring buffer.
    pub unsafe fn set_fd_signal(&mut self, fd_signal: *mut FdSignal, device_type: DeviceType) {
        self.fd_signal = NonNull::new(fd_signal);
        self.device_type = Some(device_type);
    }

    /// Fire the bound FD signal unconditionally.
    pub fn trigger_fd_signal(&mut self) {
        if let Some(mut fd) = self.fd_signal {
            let _ = unsafe { fd.as_mut() }.write();
        }
    }

    pub fn update_available(&mut self, access: RingBufferAccess) -> Result<u32, RingBufferError> {
        match &mut self.kind {
            Kind::Real(ptr) => unsafe { ptr.as_ref() }.update_available(access),
            Kind::Mirror(mirror) => mirror.update_available(),
        }
    }

    /// Open an access window; the granted areas are available through
    /// [`areas`](Self::areas) until `end_access`.
    pub fn begin_access(
        &mut self,
        access: RingBufferAccess,
        frames: &mut u32,
    ) -> Result<u32, RingBufferError> {
        match &mut self.kind {
            Kind::Real(ptr) => unsafe { ptr.as_ref() }.begin_access(access, frames),
            Kind::Mirror(mirror) => {
                let mut offset = 0;
                mirror.begin_access(&mut self.areas, &mut offset, frames)?;
                Ok(offset)
            }
        }
    }

    pub fn end_access(
        &mut self,
        access: RingBufferAccess,
        offset: u32,
        frames: u32,
    ) -> Result<(), RingBufferError> {
        match &mut self.kind {
            Kind::Real(ptr) => {
                let effects = unsafe { ptr.as_ref() }.end_access(access, offset, frames)?;
                // The signal only fires in the process that owns it, and
                // only for the side the client's poll is waiting on.
                let fire = match (effects.fd_hint, self.device_type) {
                    (Some(RingBufferAccess::Read), Some(DeviceType::Source)) => true,
                    (Some(RingBufferAccess::Write), Some(DeviceType::Sink)) => true,
                    _ => false,
                };
                if fire {
                    self.trigger_fd_signal();
                }
                Ok(())
            }
            Kind::Mirror(mirror) => mirror.end_access(offset, frames),
        }
    }

    /// The channel areas of the current buffer. For a mirror these are
    /// valid between `begin_access` and `end_access` only.
    pub fn areas(&self) -> &[AudioArea] {
        &self.areas
    }

    /// The channel areas of a real buffer; `NotAllowed` for a mirror whose
    /// areas are owned by the device.
    pub fn get_areas(&self) -> Result<&[AudioArea], RingBufferError> {
        match &self.kind {
            Kind::Real(_) => Ok(&self.areas),
            Kind::Mirror(_) => Err(RingBufferError::NotAllowed),
        }
    }

    pub fn wait_read(&self, num_periods: u32, timeout_ms: u32) -> Result<(), RingBufferError> {
        match self.real() {
            Some(real) => real.wait_read(num_periods, timeout_ms),
            None => Err(RingBufferError::NotAllowed),
        }
    }

    pub fn wait_write(&self, num_periods: u32, timeout_ms: u32) -> Result<(), RingBufferError> {
        match self.real() {
            Some(real) => real.wait_write(num_periods, timeout_ms),
            None => Err(RingBufferError::NotAllowed),
        }
    }

    pub fn timestamp(&mut self, access: RingBufferAccess) -> Result<AudioTimestamp, RingBufferError> {
        match &mut self.kind {
            Kind::Real(ptr) => unsafe { ptr.as_ref() }.timestamp(access),
            Kind::Mirror(mirror) => Ok(mirror.timestamp()),
        }
    }

    pub fn set_streaming_state(&self, state: StreamingState) -> Result<(), RingBufferError> {
        match self.real() {
            Some(real) => {
                real.set_streaming_state(state.into());
                Ok(())
            }
            None => Err(RingBufferError::NotAllowed),
        }
    }

    pub fn streaming_state(&self) -> Option<StreamingState> {
        self.real().map(|r| r.streaming_state().into())
    }

    pub fn read_offset(&self) -> u32 {
        self.real().map(|r| r.read_offset()).unwrap_or(0)
    }

    pub fn write_offset(&self) -> u32 {
        self.real().map(|r| r.write_offset()).unwrap_or(0)
    }

    pub fn hw_ptr_read(&self) -> i64 {
        self.real().map(|r| r.hw_ptr_read()).unwrap_or(0)
    }

    pub fn hw_ptr_write(&self) -> i64 {
        self.real().map(|r| r.hw_ptr_write()).unwrap_or(0)
    }

    pub fn reset_from_writer(&self) {
        if let Some(real) = self.real() {
            let _ = real.reset_from_writer();
        }
    }

    pub fn reset_from_reader(&self) {
        if let Some(real) = self.real() {
            let _ = real.reset_from_reader();
        }
    }

    pub fn zero_out(&self) {
        if let Some(real) = self.real() {
            let _ = real.zero_out();
        }
    }

    pub(crate) fn real_record(&self) -> Option<NonNull<RingBufferReal>> {
        match &self.kind {
            Kind::Real(ptr) => Some(*ptr),
            Kind::Mirror(_) => None,
        }
    }
}

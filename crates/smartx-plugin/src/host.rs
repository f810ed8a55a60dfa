//! Types of the host framework's I/O-plugin contract.
//!
//! The framework itself (loader, constraint solver, poll dispatch) is an
//! external collaborator; these are the records and conventions it
//! exchanges with the connector: the plugin-data block whose fields the
//! framework fills during negotiation, the per-channel transfer area, the
//! constraint-publication sink and the wire encodings of formats and
//! access types.

use std::os::raw::{c_int, c_uint, c_void};

use smartx_common::{AccessLayout, AccessType, AudioArea, SampleFormat, StreamDirection};

/// Wire encodings of the framework's sample formats.
pub const HOST_FORMAT_S16_LE: c_uint = 2;
pub const HOST_FORMAT_S32_LE: c_uint = 10;
pub const HOST_FORMAT_FLOAT_LE: c_uint = 14;

/// Wire encodings of the framework's access types.
pub const HOST_ACCESS_MMAP_INTERLEAVED: c_uint = 0;
pub const HOST_ACCESS_MMAP_NONINTERLEAVED: c_uint = 1;
pub const HOST_ACCESS_RW_INTERLEAVED: c_uint = 3;
pub const HOST_ACCESS_RW_NONINTERLEAVED: c_uint = 4;

/// State of the plugin's PCM state machine, as maintained by the
/// framework and mirrored into the plugin-data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Open,
    Setup,
    Prepared,
    Running,
    Xrun,
    Draining,
    Paused,
    Suspended,
}

/// Per-channel transfer area in the framework's layout: byte address plus
/// bit offset and bit step.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HostChannelArea {
    pub addr: *mut c_void,
    pub first: c_uint,
    pub step: c_uint,
}

impl Default for HostChannelArea {
    fn default() -> Self {
        HostChannelArea {
            addr: std::ptr::null_mut(),
            first: 0,
            step: 0,
        }
    }
}

/// The plugin-data block. The framework owns negotiation; by the time a
/// callback runs, the negotiated fields below are valid.
#[derive(Debug)]
pub struct IoPlugData {
    pub state: PluginState,
    pub stream: StreamDirection,
    pub nonblock: bool,
    pub channels: u32,
    pub rate: u32,
    pub format: Option<SampleFormat>,
    pub period_size: u64,
    pub buffer_size: u64,
    pub poll_fd: c_int,
    pub poll_events: i16,
}

impl IoPlugData {
    pub fn new(stream: StreamDirection) -> Self {
        IoPlugData {
            state: PluginState::Open,
            stream,
            nonblock: false,
            channels: 0,
            rate: 0,
            format: None,
            period_size: 0,
            buffer_size: 0,
            poll_fd: -1,
            poll_events: 0,
        }
    }
}

/// Axes of the framework's hardware-constraint space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwParam {
    Format,
    Access,
    Channels,
    Rate,
    PeriodBytes,
    Periods,
}

/// Sink through which the connector publishes its constraints to the
/// framework; implemented by the framework adapter (and by test fakes).
pub trait ConstraintPublisher {
    fn set_param_list(&mut self, param: HwParam, values: &[c_uint]) -> c_int;
    fn set_param_minmax(&mut self, param: HwParam, min: c_uint, max: c_uint) -> c_int;
}

/// Internal format to framework wire encoding.
pub fn format_to_host(format: SampleFormat) -> c_uint {
    match format {
        SampleFormat::Int16 => HOST_FORMAT_S16_LE,
        SampleFormat::Int32 => HOST_FORMAT_S32_LE,
        SampleFormat::Float32 => HOST_FORMAT_FLOAT_LE,
    }
}

/// Framework wire encoding to internal format.
pub fn format_from_host(format: c_uint) -> Option<SampleFormat> {
    match format {
        HOST_FORMAT_S16_LE => Some(SampleFormat::Int16),
        HOST_FORMAT_S32_LE => Some(SampleFormat::Int32),
        HOST_FORMAT_FLOAT_LE => Some(SampleFormat::Float32),
        _ => None,
    }
}

/// Internal layout plus transport flavour to framework access encoding.
/// The client side always accepts both the read/write and the mmap
/// flavour of each layout.
pub fn access_to_host(layout: AccessLayout, flavour: AccessType) -> c_uint {
    match (layout, flavour) {
        (AccessLayout::Interleaved, AccessType::Rw) => HOST_ACCESS_RW_INTERLEAVED,
        (AccessLayout::Interleaved, AccessType::Mmap) => HOST_ACCESS_MMAP_INTERLEAVED,
        (AccessLayout::NonInterleaved, AccessType::Rw) => HOST_ACCESS_RW_NONINTERLEAVED,
        (AccessLayout::NonInterleaved, AccessType::Mmap) => HOST_ACCESS_MMAP_NONINTERLEAVED,
    }
}

/// Convert an internal area descriptor into the framework's layout.
pub fn area_to_host(area: &AudioArea) -> HostChannelArea {
    HostChannelArea {
        addr: area.start as *mut c_void,
        first: area.first_bit,
        step: area.step_bits,
    }
}

/// Convert a framework area into the internal descriptor.
pub fn area_from_host(area: &HostChannelArea, index: u32, max_index: u32) -> AudioArea {
    AudioArea {
        start: area.addr as *mut u8,
        first_bit: area.first,
        step_bits: area.step,
        index,
        max_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_mapping_is_bijective() {
        for fmt in [
            SampleFormat::Int16,
            SampleFormat::Int32,
            SampleFormat::Float32,
        ] {
            assert_eq!(format_from_host(format_to_host(fmt)), Some(fmt));
        }
        assert_eq!(format_from_host(999), None);
    }

    #[test]
    fn access_covers_both_flavours() {
        assert_eq!(
            access_to_host(AccessLayout::Interleaved, AccessType::Rw),
            HOST_ACCESS_RW_INTERLEAVED
        );
        assert_eq!(
            access_to_host(AccessLayout::NonInterleaved, AccessType::Mmap),
            HOST_ACCESS_MMAP_NONINTERLEAVED
        );
    }
}

//! Plain data types shared between the plugin, the transport and the router.

use std::fmt;

/// PCM sample format carried through the shared-memory buffers.
///
/// The wire values are fixed because the enum crosses the process boundary
/// inside shared-memory records and IPC payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SampleFormat {
    Int16 = 1,
    Int32 = 2,
    Float32 = 3,
}

impl SampleFormat {
    /// Size of one sample in bytes.
    #[inline]
    pub const fn sample_size(self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Int32 | SampleFormat::Float32 => 4,
        }
    }

    /// Size of one sample in bits, as used by the area descriptors.
    #[inline]
    pub const fn sample_bits(self) -> u32 {
        (self.sample_size() as u32) * 8
    }

    pub fn from_wire(value: i32) -> Option<SampleFormat> {
        match value {
            1 => Some(SampleFormat::Int16),
            2 => Some(SampleFormat::Int32),
            3 => Some(SampleFormat::Float32),
            _ => None,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleFormat::Int16 => "Int16",
            SampleFormat::Int32 => "Int32",
            SampleFormat::Float32 => "Float32",
        };
        f.write_str(name)
    }
}

/// Role of a device as seen from the router: a `Source` produces PCM frames
/// into the ring buffer (playback device), a `Sink` consumes them (capture).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DeviceType {
    Source = 1,
    Sink = 2,
}

/// Direction of the stream from the application's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Playback,
    Capture,
}

impl StreamDirection {
    /// Suffix appended to the fully qualified device name. The router derives
    /// the device type from this suffix when it sets up the ring buffer.
    pub const fn name_suffix(self) -> &'static str {
        match self {
            StreamDirection::Playback => "_p",
            StreamDirection::Capture => "_c",
        }
    }
}

/// Which side of a ring buffer an access targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingBufferAccess {
    Read,
    Write,
}

impl RingBufferAccess {
    #[inline]
    pub fn opposite(self) -> RingBufferAccess {
        match self {
            RingBufferAccess::Read => RingBufferAccess::Write,
            RingBufferAccess::Write => RingBufferAccess::Read,
        }
    }
}

/// Channel layout of a PCM buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum AccessLayout {
    Interleaved = 1,
    NonInterleaved = 2,
}

/// Host-framework transport flavour. The client side accepts both for every
/// layout, so each internal layout is published twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Rw,
    Mmap,
}

/// Timestamp record maintained per transfer direction of a ring buffer.
///
/// `timestamp_us` is a monotonic microsecond stamp taken inside the same
/// critical section that advances the buffer offsets, so a reader always
/// observes a consistent (offset, hw_ptr, timestamp, frames) tuple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct AudioTimestamp {
    pub timestamp_us: u64,
    pub num_transmitted_frames: u64,
}

/// Hardware parameters negotiated by the plugin, sent to the router when the
/// host framework fixes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SetParameters {
    pub num_channels: u32,
    pub sample_rate: u32,
    pub period_size: u32,
    pub num_periods: u32,
    pub data_format: SampleFormat,
}

impl Default for SetParameters {
    fn default() -> Self {
        SetParameters {
            num_channels: 0,
            sample_rate: 0,
            period_size: 0,
            num_periods: 0,
            data_format: SampleFormat::Float32,
        }
    }
}

impl SetParameters {
    /// Total buffer size in frames.
    #[inline]
    pub fn buffer_size(&self) -> u32 {
        self.num_periods * self.period_size
    }
}

/// Sizing parameters of an audio device, used when the router creates the
/// ring buffer that backs a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceParams {
    pub name: String,
    pub num_channels: u32,
    pub sample_rate: u32,
    pub data_format: SampleFormat,
    pub period_size: u32,
    pub num_periods: u32,
}

impl DeviceParams {
    pub fn new(
        name: impl Into<String>,
        num_channels: u32,
        sample_rate: u32,
        data_format: SampleFormat,
        period_size: u32,
        num_periods: u32,
    ) -> Self {
        DeviceParams {
            name: name.into(),
            num_channels,
            sample_rate,
            data_format,
            period_size,
            num_periods,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_sizes_match_wire_layout() {
        assert_eq!(SampleFormat::Int16.sample_size(), 2);
        assert_eq!(SampleFormat::Int32.sample_size(), 4);
        assert_eq!(SampleFormat::Float32.sample_size(), 4);
        assert_eq!(SampleFormat::Int16.sample_bits(), 16);
    }

    #[test]
    fn wire_roundtrip() {
        for fmt in [
            SampleFormat::Int16,
            SampleFormat::Int32,
            SampleFormat::Float32,
        ] {
            assert_eq!(SampleFormat::from_wire(fmt as i32), Some(fmt));
        }
        assert_eq!(SampleFormat::from_wire(0), None);
    }

    #[test]
    fn direction_suffix() {
        assert_eq!(StreamDirection::Playback.name_suffix(), "_p");
        assert_eq!(StreamDirection::Capture.name_suffix(), "_c");
    }
}

//! Shared vocabulary of the smartx transport: sample formats, channel area
//! descriptors, the format-converting area copier and the wav data probe.

pub mod area;
pub mod copier;
pub mod probe;
pub mod types;

pub use area::AudioArea;
pub use copier::{copy_audio_area_buffers, zero_audio_area_buffers};
pub use probe::{DataProbe, ProbeResult, ProbingAction, ProbingParams, ProbingQueueEntry};
pub use types::{
    AccessLayout, AccessType, AudioTimestamp, DeviceParams, DeviceType, RingBufferAccess,
    SampleFormat, SetParameters, StreamDirection,
};

//! Sample rate conversion built around Farrow polynomial interpolation of
//! polyphase FIR prototype banks.
//!
//! Used in two roles: inside the transport to service devices on a foreign
//! clock (paired with the adaptive [`controller`]), and standalone through
//! the host framework's rate-converter plugin surface ([`rate_plugin`]).

pub mod coeff;
pub mod controller;
pub mod farrow;
mod fir;
pub mod rate_plugin;
pub mod sample;
pub mod wrapper;

pub use controller::{ControllerOutput, ControllerParams, SrcController};
pub use farrow::{BufferMode, ProcessResult, SrcError, SrcFarrow};
pub use sample::SrcSample;
pub use wrapper::{SrcWrapper, SrcWrapperParams, WrapperProcessResult};

/// Gain applied to every output sample (-1 dB) to leave saturation
/// headroom in the fixed-point conversions.
pub const OUTPUT_GAIN: f32 = 0.891250938;

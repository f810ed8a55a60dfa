//! Safe binding of the Farrow core to a pair of audio areas.
//!
//! The wrapper owns one converter instance per (input type, output type)
//! pair, derives the per-channel base pointers and strides from the area
//! descriptors once at init time, and drives the pull-mode core with a
//! fixed unity ratio adjustment (synchronous usage).

use log::error;
use thiserror::Error;

use smartx_common::{AudioArea, SampleFormat};

use crate::farrow::{BufferMode, SrcFarrow};
use crate::sample::SrcSample;

const LOG: &str = "src";

const MIN_SAMPLE_RATE: u32 = 8_000;
const MAX_SAMPLE_RATE: u32 = 96_000;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WrapperError {
    #[error("invalid wrapper parameter")]
    InvalidParam,
    #[error("sample rate conversion failed")]
    Failed,
}

/// Configuration of one wrapper instance.
#[derive(Debug, Clone)]
pub struct SrcWrapperParams {
    pub input_format: SampleFormat,
    pub output_format: SampleFormat,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub num_channels: u32,
    /// First channel inside the input area.
    pub input_index: u32,
    /// First channel inside the output area.
    pub output_index: u32,
}

/// Result counts of one wrapper process call.
#[derive(Debug, Clone, Copy, Default)]
pub struct WrapperProcessResult {
    pub num_generated: u32,
    pub num_consumed: u32,
}

pub struct SrcWrapper<T1: SrcSample, T2: SrcSample> {
    src: SrcFarrow,
    input_base: Vec<*const T1>,
    output_base: Vec<*mut T2>,
    input_ptrs: Vec<*const T1>,
    output_ptrs: Vec<*mut T2>,
    input_stride: u32,
    output_stride: u32,
    num_channels: u32,
}

unsafe impl<T1: SrcSample, T2: SrcSample> Send for SrcWrapper<T1, T2> {}

impl<T1: SrcSample, T2: SrcSample> SrcWrapper<T1, T2> {
    /// Validate the parameters and bind the converter to the areas. The
    /// areas must stay valid for the lifetime of the wrapper.
    pub fn new(
        params: &SrcWrapperParams,
        in_areas: &[AudioArea],
        out_areas: &[AudioArea],
    ) -> Result<Self, WrapperError> {
        check_params(params)?;
        if in_areas.is_empty() || out_areas.is_empty() {
            error!(target: LOG, "input or output area missing");
            return Err(WrapperError::InvalidParam);
        }
        if params.input_index + params.num_channels > in_areas[0].max_index + 1 {
            error!(target: LOG, "channel count and input start index exceed the input area");
            return Err(WrapperError::InvalidParam);
        }
        if params.output_index + params.num_channels > out_areas[0].max_index + 1 {
            error!(target: LOG, "channel count and output start index exceed the output area");
            return Err(WrapperError::InvalidParam);
        }

        let n = params.num_channels as usize;
        let mut input_base = Vec::with_capacity(n);
        let mut output_base = Vec::with_capacity(n);
        for i in 0..n {
            let in_area = &in_areas[i + params.input_index as usize];
            let out_area = &out_areas[i + params.output_index as usize];
            input_base.push(unsafe {
                (in_area.start as *const T1).add((in_area.first_bit as usize / 8) / std::mem::size_of::<T1>())
            });
            output_base.push(unsafe {
                (out_area.start as *mut T2).add((out_area.first_bit as usize / 8) / std::mem::size_of::<T2>())
            });
        }
        let input_stride = in_areas[0].step_bits / (8 * std::mem::size_of::<T1>() as u32);
        let output_stride = out_areas[0].step_bits / (8 * std::mem::size_of::<T2>() as u32);

        let mut src = SrcFarrow::new(params.num_channels).map_err(|_| WrapperError::Failed)?;
        src.set_conversion_ratio(params.input_sample_rate, params.output_sample_rate)
            .map_err(|e| {
                error!(
                    target: LOG,
                    "cannot set conversion ratio {} -> {}: {e}",
                    params.input_sample_rate,
                    params.output_sample_rate
                );
                WrapperError::Failed
            })?;
        src.set_buffer_mode(BufferMode::Linear);

        Ok(SrcWrapper {
            src,
            input_base,
            output_base,
            input_ptrs: vec![std::ptr::null(); n],
            output_ptrs: vec![std::ptr::null_mut(); n],
            input_stride,
            output_stride,
            num_channels: params.num_channels,
        })
    }

    pub fn reset(&mut self) -> Result<(), WrapperError> {
        self.src.reset().map_err(|_| WrapperError::Failed)
    }

    /// Produce `num_output_samples` output frames starting `sink_offset`
    /// frames into the output area, consuming from `src_offset` frames into
    /// the input area.
    pub fn process(
        &mut self,
        length_input_buffers: u32,
        num_output_samples: u32,
        src_offset: u32,
        sink_offset: u32,
    ) -> Result<WrapperProcessResult, WrapperError> {
        for i in 0..self.num_channels as usize {
            self.input_ptrs[i] =
                unsafe { self.input_base[i].add((src_offset * self.input_stride) as usize) };
            self.output_ptrs[i] =
                unsafe { self.output_base[i].add((sink_offset * self.output_stride) as usize) };
        }
        let result = unsafe {
            self.src.process_pull_mode(
                &self.output_ptrs,
                &self.input_ptrs,
                self.output_stride,
                self.input_stride,
                0,
                length_input_buffers,
                num_output_samples,
                self.num_channels,
                1.0,
            )
        }
        .map_err(|e| {
            error!(target: LOG, "error during sample rate conversion: {e}");
            WrapperError::Failed
        })?;
        Ok(WrapperProcessResult {
            num_generated: result.num_generated,
            num_consumed: result.num_consumed,
        })
    }
}

fn check_params(params: &SrcWrapperParams) -> Result<(), WrapperError> {
    if params.input_sample_rate < MIN_SAMPLE_RATE || params.input_sample_rate > MAX_SAMPLE_RATE {
        error!(target: LOG, "input sample rate out of range: {}", params.input_sample_rate);
        return Err(WrapperError::InvalidParam);
    }
    if params.output_sample_rate < MIN_SAMPLE_RATE || params.output_sample_rate > MAX_SAMPLE_RATE {
        error!(target: LOG, "output sample rate out of range: {}", params.output_sample_rate);
        return Err(WrapperError::InvalidParam);
    }
    if params.num_channels == 0 {
        error!(target: LOG, "invalid number of channels");
        return Err(WrapperError::InvalidParam);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartx_common::area::make_non_interleaved_areas;

    fn params(rate_in: u32, rate_out: u32) -> SrcWrapperParams {
        SrcWrapperParams {
            input_format: SampleFormat::Float32,
            output_format: SampleFormat::Float32,
            input_sample_rate: rate_in,
            output_sample_rate: rate_out,
            num_channels: 2,
            input_index: 0,
            output_index: 0,
        }
    }

    #[test]
    fn unity_conversion_counts() {
        let frames = 256u32;
        let mut input = vec![0.0f32; (frames * 2) as usize];
        let mut output = vec![0.0f32; (frames * 2) as usize];
        let in_areas = make_non_interleaved_areas(
            input.as_mut_ptr() as *mut u8,
            2,
            frames,
            SampleFormat::Float32,
        );
        let out_areas = make_non_interleaved_areas(
            output.as_mut_ptr() as *mut u8,
            2,
            frames,
            SampleFormat::Float32,
        );
        let mut wrapper: SrcWrapper<f32, f32> =
            SrcWrapper::new(&params(48_000, 48_000), &in_areas, &out_areas).unwrap();
        let res = wrapper.process(frames, frames, 0, 0).unwrap();
        assert_eq!(res.num_generated, frames);
    }

    #[test]
    fn rate_bounds_are_enforced() {
        let mut buf = vec![0.0f32; 8];
        let areas = make_non_interleaved_areas(
            buf.as_mut_ptr() as *mut u8,
            2,
            4,
            SampleFormat::Float32,
        );
        assert!(SrcWrapper::<f32, f32>::new(&params(4_000, 48_000), &areas, &areas).is_err());
        assert!(SrcWrapper::<f32, f32>::new(&params(48_000, 192_000), &areas, &areas).is_err());
    }

    #[test]
    fn channel_fit_is_enforced() {
        let mut buf = vec![0.0f32; 8];
        let areas = make_non_interleaved_areas(
            buf.as_mut_ptr() as *mut u8,
            1,
            8,
            SampleFormat::Float32,
        );
        // Two channels requested against a mono area.
        assert!(SrcWrapper::<f32, f32>::new(&params(48_000, 48_000), &areas, &areas).is_err());
    }
}

//! Sample rate converter based on Farrow's structure.
//!
//! A bank of `N` polyphase FIR prototypes of length `M` is combined by
//! Horner's method at the current fractional phase `t` into the
//! time-variant impulse response of each output instant. The push-mode
//! driver consumes a caller-defined number of input samples and emits into
//! a ring or linear output buffer; the pull-mode driver produces a
//! caller-defined number of output samples from a ring or linear input
//! buffer. Parameter changes travel through a command queue so off-thread
//! callers never race the processing loop.

use crossbeam_queue::ArrayQueue;
use thiserror::Error;

use crate::coeff::{self, FilterTable};
use crate::fir::FarrowFirFilter;
use crate::sample::SrcSample;
use crate::OUTPUT_GAIN;

const MAX_FILTER_LENGTH: usize = 128;
const MAX_NUM_FILTERS: usize = 7;
const COMMAND_QUEUE_DEPTH: usize = 16;

/// Round-off compensation for the detune factor: the fractional phase is
/// repeatedly truncated, so the factor is nudged up by one mantissa step.
const DETUNE_CORRECTION: f64 = 1.0 + 1e-15;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SrcError {
    #[error("invalid parameter")]
    InvalidParam,
    #[error("converter is not initialized")]
    NotInitialized,
    #[error("parameter command queue is full")]
    QueueFull,
    #[error("processing failed")]
    Failed,
}

/// Whether the indexed buffer wraps (ring) or restarts at zero with each
/// call (linear).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    Ring,
    Linear,
}

/// Frame counts produced by one processing call, plus the updated ring
/// index of the indexed buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessResult {
    pub num_generated: u32,
    pub num_consumed: u32,
    /// Push mode: write index after the call. Pull mode: read index.
    pub ring_index: u32,
}

enum Command {
    SetConversionRatio {
        table: &'static FilterTable,
        fs_ratio: f64,
        fs_ratio_inv: f64,
    },
    DetunePitch {
        input_blocklen: u32,
        output_blocklen: u32,
    },
    Reset,
}

pub struct SrcFarrow {
    buffer_mode: BufferMode,
    t_value: f64,
    t_value_hat: f32,
    fs_ratio: f64,
    fs_ratio_inv: f64,
    detune_factor: f64,
    detuned_mode: bool,
    max_channels: u32,
    ring_buffer_index: u32,
    filter_length: u32,
    num_filters: u32,
    initialized: bool,
    prototypes: Option<&'static [f32]>,
    time_var_imp_resp: Vec<f32>,
    fir: FarrowFirFilter,
    commands: ArrayQueue<Command>,
}

/// Free slots in the output ring. One slot is kept empty so that
/// `read == write` always means an empty buffer.
#[inline]
fn num_free_samples(read_index: u32, write_index: u32, length: u32) -> u32 {
    let free = if read_index > write_index {
        read_index - write_index
    } else {
        length + read_index - write_index
    };
    free - 1
}

/// Filled slots in the input ring.
#[inline]
fn num_filled_samples(write_index: u32, read_index: u32, length: u32) -> u32 {
    if write_index >= read_index {
        write_index - read_index
    } else {
        length + write_index - read_index
    }
}

#[inline]
fn increment_index(index: u32, length: u32) -> u32 {
    let next = index + 1;
    if next >= length {
        0
    } else {
        next
    }
}

impl SrcFarrow {
    pub fn new(max_channels: u32) -> Result<Self, SrcError> {
        if max_channels == 0 {
            return Err(SrcError::InvalidParam);
        }
        let mut src = SrcFarrow {
            buffer_mode: BufferMode::Ring,
            t_value: 0.0,
            t_value_hat: 0.0,
            fs_ratio: 1.0,
            fs_ratio_inv: 1.0,
            detune_factor: 1.0,
            detuned_mode: false,
            max_channels,
            ring_buffer_index: 0,
            filter_length: 0,
            num_filters: 0,
            initialized: false,
            prototypes: None,
            time_var_imp_resp: vec![0.0; MAX_FILTER_LENGTH],
            fir: FarrowFirFilter::new(MAX_FILTER_LENGTH, max_channels as usize),
            commands: ArrayQueue::new(COMMAND_QUEUE_DEPTH),
        };
        src.initialized = true;
        src.reset()?;
        Ok(src)
    }

    /// Queue a conversion-ratio change; applied before the next process
    /// call emits output.
    pub fn set_conversion_ratio(&mut self, input_rate: u32, output_rate: u32) -> Result<(), SrcError> {
        let table = coeff::lookup(input_rate, output_rate).ok_or(SrcError::InvalidParam)?;
        debug_assert!(table.filter_length as usize <= MAX_FILTER_LENGTH);
        debug_assert!(table.num_filters as usize <= MAX_NUM_FILTERS);
        self.commands
            .push(Command::SetConversionRatio {
                table,
                fs_ratio: input_rate as f64 / output_rate as f64,
                fs_ratio_inv: output_rate as f64 / input_rate as f64,
            })
            .map_err(|_| SrcError::QueueFull)
    }

    /// Queue a pitch detune so that every `input_blocklen` input samples
    /// yield exactly `output_blocklen` output samples. Reverted by the next
    /// `set_conversion_ratio`.
    pub fn detune_pitch(&mut self, input_blocklen: u32, output_blocklen: u32) -> Result<(), SrcError> {
        if input_blocklen == 0 || output_blocklen == 0 {
            return Err(SrcError::InvalidParam);
        }
        self.commands
            .push(Command::DetunePitch {
                input_blocklen,
                output_blocklen,
            })
            .map_err(|_| SrcError::QueueFull)
    }

    /// Queue a reset of all internal buffers.
    pub fn reset(&mut self) -> Result<(), SrcError> {
        if !self.initialized {
            return Err(SrcError::NotInitialized);
        }
        self.commands
            .push(Command::Reset)
            .map_err(|_| SrcError::QueueFull)
    }

    pub fn set_buffer_mode(&mut self, mode: BufferMode) {
        self.buffer_mode = mode;
    }

    /// Gain applied to every output sample; below unity to leave headroom
    /// for the fixed-point conversions.
    pub fn output_gain(&self) -> f32 {
        OUTPUT_GAIN
    }

    fn execute_queued_commands(&mut self) -> Result<(), SrcError> {
        while let Some(command) = self.commands.pop() {
            match command {
                Command::SetConversionRatio {
                    table,
                    fs_ratio,
                    fs_ratio_inv,
                } => {
                    self.detuned_mode = false;
                    self.detune_factor = 1.0;
                    self.filter_length = table.filter_length;
                    self.num_filters = table.num_filters;
                    self.prototypes = Some(table.coeff);
                    self.fs_ratio = fs_ratio;
                    self.fs_ratio_inv = fs_ratio_inv;
                    self.t_value = 0.0;
                    self.fir
                        .set_filter_length(table.filter_length as usize)
                        .map_err(|_| SrcError::Failed)?;
                    self.fir.reset();
                }
                Command::DetunePitch {
                    input_blocklen,
                    output_blocklen,
                } => {
                    self.detune_factor = DETUNE_CORRECTION * input_blocklen as f64
                        / (output_blocklen as f64 * self.fs_ratio);
                    self.t_value = 0.0;
                    self.detuned_mode = true;
                }
                Command::Reset => {
                    self.fir.reset();
                    self.ring_buffer_index = 0;
                    self.t_value = 0.0;
                }
            }
        }
        Ok(())
    }

    /// Update the time-variant impulse response for phase `t` by Horner
    /// evaluation over the prototype bank.
    fn update_impulse_response(&mut self, t: f32) {
        let prototypes = self.prototypes.expect("checked by the process drivers");
        let m = self.filter_length as usize;
        let n = self.num_filters as usize;
        for cnt in 0..m {
            let mut y = prototypes[(n - 1) * m + cnt];
            for k in (0..n - 1).rev() {
                y = prototypes[k * m + cnt] + t * y;
            }
            self.time_var_imp_resp[cnt] = y;
        }
    }

    fn check_process_params(
        &mut self,
        num_channels: u32,
        indexed_buffer_length: u32,
        ratio_adjustment: f32,
    ) -> Result<(), SrcError> {
        if num_channels > self.max_channels || ratio_adjustment < 0.01 {
            return Err(SrcError::InvalidParam);
        }
        if self.buffer_mode == BufferMode::Ring && indexed_buffer_length < 2 {
            return Err(SrcError::InvalidParam);
        }
        self.execute_queued_commands()?;
        if self.num_filters == 0 || self.filter_length == 0 {
            return Err(SrcError::InvalidParam);
        }
        Ok(())
    }

    /// Push-mode processing: consume up to `num_input_samples` input
    /// samples and emit as many output samples as the phase accumulator
    /// yields into the output (ring) buffers.
    ///
    /// # Safety
    /// `outputs`/`inputs` must hold one valid pointer per channel,
    /// addressable with the given strides over the declared buffer lengths.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn process_push_mode<T1: SrcSample, T2: SrcSample>(
        &mut self,
        outputs: &[*mut T2],
        inputs: &[*const T1],
        output_stride: u32,
        input_stride: u32,
        read_index: u32,
        length_output_buffers: u32,
        num_input_samples: u32,
        num_channels: u32,
        ratio_adjustment: f32,
    ) -> Result<ProcessResult, SrcError> {
        self.check_process_params(num_channels, length_output_buffers, ratio_adjustment)?;

        let max_output_samples = if self.buffer_mode == BufferMode::Linear {
            self.ring_buffer_index = 0;
            length_output_buffers
        } else {
            num_free_samples(read_index, self.ring_buffer_index, length_output_buffers)
        };

        let mut current_fs_ratio = self.fs_ratio * ratio_adjustment as f64;
        if self.detuned_mode {
            current_fs_ratio *= self.detune_factor;
            // Reset the phase each block so round-off cannot accumulate.
            self.t_value = 0.0;
        }

        let mut cnt_output = 0u32;
        let mut cnt_input = 0u32;
        let mut write_index = self.ring_buffer_index;

        while cnt_input < num_input_samples {
            if self.t_value < 1.0 {
                if cnt_output >= max_output_samples {
                    break;
                }
                self.update_impulse_response(self.t_value as f32);
                unsafe {
                    self.fir
                        .process_sample(
                            &self.time_var_imp_resp,
                            outputs,
                            (write_index * output_stride) as usize,
                            num_channels as usize,
                        )
                        .map_err(|_| SrcError::Failed)?;
                }
                write_index = increment_index(write_index, length_output_buffers);
                cnt_output += 1;
                self.t_value += current_fs_ratio;
            } else {
                self.t_value -= 1.0;
                unsafe {
                    self.fir
                        .insert_sample(
                            inputs,
                            (cnt_input * input_stride) as usize,
                            num_channels as usize,
                        )
                        .map_err(|_| SrcError::Failed)?;
                }
                cnt_input += 1;
            }
        }

        self.ring_buffer_index = write_index;
        Ok(ProcessResult {
            num_generated: cnt_output,
            num_consumed: cnt_input,
            ring_index: write_index,
        })
    }

    /// Pull-mode processing: produce up to `num_output_samples` output
    /// samples, consuming from the input (ring) buffers as the phase
    /// accumulator requires.
    ///
    /// # Safety
    /// `outputs`/`inputs` must hold one valid pointer per channel,
    /// addressable with the given strides over the declared buffer lengths.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn process_pull_mode<T1: SrcSample, T2: SrcSample>(
        &mut self,
        outputs: &[*mut T2],
        inputs: &[*const T1],
        output_stride: u32,
        input_stride: u32,
        write_index: u32,
        length_input_buffers: u32,
        num_output_samples: u32,
        num_channels: u32,
        ratio_adjustment: f32,
    ) -> Result<ProcessResult, SrcError> {
        self.check_process_params(num_channels, length_input_buffers, ratio_adjustment)?;

        let max_input_samples = if self.buffer_mode == BufferMode::Linear {
            self.ring_buffer_index = 0;
            length_input_buffers
        } else {
            num_filled_samples(write_index, self.ring_buffer_index, length_input_buffers)
        };

        // In pull mode the adjustment refers to outputRate/inputRate, so it
        // scales the inverse ratio.
        let mut current_fs_ratio_inv = self.fs_ratio_inv * ratio_adjustment as f64;
        if self.detuned_mode {
            current_fs_ratio_inv *= self.detune_factor;
            self.t_value = 0.0;
        }
        let current_fs_ratio = (1.0 / current_fs_ratio_inv) as f32;

        let mut cnt_output = 0u32;
        let mut cnt_input = 0u32;
        let mut read_index = self.ring_buffer_index;

        while cnt_output < num_output_samples {
            if self.t_value < 1.0 {
                // Consume one input sample.
                if cnt_input >= max_input_samples {
                    break;
                }
                // Re-sync the output phase to the input phase and advance
                // the input phase like the push-mode update would.
                self.t_value_hat = (1.0 - self.t_value as f32) * current_fs_ratio;
                self.t_value += current_fs_ratio_inv;
                unsafe {
                    self.fir
                        .insert_sample(
                            inputs,
                            (read_index * input_stride) as usize,
                            num_channels as usize,
                        )
                        .map_err(|_| SrcError::Failed)?;
                }
                read_index = increment_index(read_index, length_input_buffers);
                cnt_input += 1;
            } else {
                self.update_impulse_response(self.t_value_hat);
                unsafe {
                    self.fir
                        .process_sample(
                            &self.time_var_imp_resp,
                            outputs,
                            (cnt_output * output_stride) as usize,
                            num_channels as usize,
                        )
                        .map_err(|_| SrcError::Failed)?;
                }
                cnt_output += 1;
                self.t_value_hat += current_fs_ratio;
                self.t_value -= 1.0;
            }
        }

        self.ring_buffer_index = read_index;
        Ok(ProcessResult {
            num_generated: cnt_output,
            num_consumed: cnt_input,
            ring_index: read_index,
        })
    }
}

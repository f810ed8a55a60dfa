//! Closed-loop controller for asynchronous sample rate conversion.
//!
//! Observes the fill level of a jitter buffer and produces the ratio
//! adjustment fed into each Farrow process call, turning the synchronous
//! converter into an ASRC that follows the clock skew between the two
//! domains. A PI controller behind a first-order low-pass; defaults are
//! chosen to be stable against the default ring-buffer size.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ControllerError {
    #[error("invalid parameter")]
    InvalidParam,
    #[error("controller already initialized")]
    InitFailed,
    #[error("controller is not initialized")]
    NotInitialized,
}

/// Tuning of the control law.
#[derive(Debug, Clone, Copy)]
pub struct ControllerParams {
    /// Proportional action coefficient.
    pub kp: f32,
    /// Reset time relative to the block length.
    pub tn: f32,
    /// Pole of the first-order input low-pass.
    pub coeff_low_pass: f32,
    pub ratio_min: f32,
    pub ratio_max: f32,
}

impl Default for ControllerParams {
    fn default() -> Self {
        ControllerParams {
            kp: 0.008,
            tn: 300.0,
            coeff_low_pass: 0.9,
            ratio_min: 0.9,
            ratio_max: 1.1,
        }
    }
}

/// Output of one controller step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerOutput {
    /// Ratio adjustment for the next Farrow process call.
    pub ratio: f32,
    /// While inactive, the caller feeds zeros downstream and the ratio
    /// stays frozen.
    pub output_active: bool,
}

pub struct SrcController {
    initialized: bool,
    params: ControllerParams,
    ratio_adaptive: f32,
    output_low_pass_old: f32,
    output_controller: f32,
    output_active: bool,
    jitter_buffer_length: u32,
    jitter_buffer_target_level: u32,
    inv_target_level: f32,
}

impl Default for SrcController {
    fn default() -> Self {
        Self::new()
    }
}

impl SrcController {
    pub fn new() -> Self {
        SrcController {
            initialized: false,
            params: ControllerParams::default(),
            ratio_adaptive: 0.0,
            output_low_pass_old: 0.0,
            output_controller: 0.0,
            output_active: false,
            jitter_buffer_length: 0,
            jitter_buffer_target_level: 0,
            inv_target_level: 0.0,
        }
    }

    pub fn init(&mut self) -> Result<(), ControllerError> {
        if self.initialized {
            return Err(ControllerError::InitFailed);
        }
        self.params = ControllerParams::default();
        self.initialized = true;
        self.reset();
        Ok(())
    }

    /// Declare the dimensions of the observed jitter buffer.
    pub fn set_jitter_buffer_params(
        &mut self,
        length: u32,
        target_level: u32,
    ) -> Result<(), ControllerError> {
        if length == 0 || target_level == 0 {
            return Err(ControllerError::InvalidParam);
        }
        self.jitter_buffer_length = length;
        self.jitter_buffer_target_level = target_level;
        self.inv_target_level = 1.0 / target_level as f32;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.ratio_adaptive = 1.0;
        self.output_low_pass_old = 0.0;
        self.output_controller = 0.0;
        self.output_active = false;
    }

    /// One control step per processed block.
    pub fn process(&mut self, current_level: u32) -> Result<ControllerOutput, ControllerError> {
        if !self.initialized
            || self.jitter_buffer_length == 0
            || self.jitter_buffer_target_level == 0
        {
            return Err(ControllerError::NotInitialized);
        }

        // Output gating: start once the level passed the target, stop when
        // the buffer ran dry.
        if current_level > self.jitter_buffer_target_level {
            self.output_active = true;
        } else if current_level == 0 {
            self.output_active = false;
        }

        if self.output_active {
            let diff = (current_level as f32 - self.jitter_buffer_target_level as f32)
                * self.inv_target_level;

            let output_low_pass = (1.0 - self.params.coeff_low_pass) * diff
                + self.params.coeff_low_pass * self.output_low_pass_old;

            // PI update, Latzel eq. (3.2.45).
            self.output_controller = self.output_controller
                + self.params.kp * (1.0 + 0.5 / self.params.tn) * output_low_pass
                - self.params.kp * (1.0 - 0.5 / self.params.tn) * self.output_low_pass_old;

            self.output_low_pass_old = output_low_pass;
            self.ratio_adaptive = (1.0 + self.output_controller)
                .clamp(self.params.ratio_min, self.params.ratio_max);
        }

        Ok(ControllerOutput {
            ratio: self.ratio_adaptive,
            output_active: self.output_active,
        })
    }
}

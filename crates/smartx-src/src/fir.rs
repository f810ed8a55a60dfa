//! Multi-channel FIR filter of the Farrow resampler.
//!
//! Every channel owns a ring of the most recent `filter_length` input
//! samples, stored twice back to back so the convolution can walk a
//! contiguous window without wrapping. Samples are inserted right to left;
//! the newest sample sits at the read start of the window, so impulse
//! response tap `m` weighs input `x[n-m]`.

use crate::sample::SrcSample;

pub struct FarrowFirFilter {
    /// Per channel: `2 * max_filter_length` samples, double-written.
    ring_buffers: Vec<Vec<f32>>,
    ring_index: usize,
    max_filter_length: usize,
    filter_length: usize,
    max_channels: usize,
}

impl FarrowFirFilter {
    pub fn new(max_filter_length: usize, max_channels: usize) -> Self {
        FarrowFirFilter {
            ring_buffers: (0..max_channels)
                .map(|_| vec![0.0; 2 * max_filter_length])
                .collect(),
            ring_index: 0,
            max_filter_length,
            filter_length: 0,
            max_channels,
        }
    }

    /// Set the active filter length; must not exceed the maximum declared
    /// at construction.
    pub fn set_filter_length(&mut self, filter_length: usize) -> Result<(), ()> {
        if filter_length > self.max_filter_length {
            return Err(());
        }
        self.filter_length = filter_length;
        Ok(())
    }

    pub fn reset(&mut self) {
        for ring in &mut self.ring_buffers {
            ring.fill(0.0);
        }
        self.ring_index = 0;
    }

    /// Insert the current sample of every channel into the rings.
    ///
    /// # Safety
    /// `inputs` must hold one valid pointer per channel, each readable at
    /// `index`.
    pub unsafe fn insert_sample<T: SrcSample>(
        &mut self,
        inputs: &[*const T],
        index: usize,
        num_channels: usize,
    ) -> Result<(), ()> {
        if num_channels > self.max_channels || self.filter_length == 0 {
            return Err(());
        }
        for chan in 0..num_channels {
            let sample = unsafe { (*inputs[chan].add(index)).to_f32() };
            let ring = &mut self.ring_buffers[chan];
            ring[self.ring_index] = sample;
            ring[self.ring_index + self.filter_length] = sample;
        }
        // The window is written right to left.
        self.ring_index = if self.ring_index > 0 {
            self.ring_index - 1
        } else {
            self.filter_length - 1
        };
        Ok(())
    }

    /// Convolve every channel with `impulse_response` and write one output
    /// sample per channel at `index`, applying the output gain (and
    /// saturation for integer formats) in the final conversion.
    ///
    /// # Safety
    /// `outputs` must hold one valid pointer per channel, each writable at
    /// `index`.
    pub unsafe fn process_sample<T: SrcSample>(
        &mut self,
        impulse_response: &[f32],
        outputs: &[*mut T],
        index: usize,
        num_channels: usize,
    ) -> Result<(), ()> {
        if num_channels > self.max_channels || impulse_response.len() < self.filter_length {
            return Err(());
        }
        let start = if self.ring_index + 1 >= self.filter_length {
            0
        } else {
            self.ring_index + 1
        };
        for chan in 0..num_channels {
            let window = &self.ring_buffers[chan][start..start + self.filter_length];
            let sum = convolve(window, &impulse_response[..self.filter_length]);
            unsafe {
                *outputs[chan].add(index) = T::from_f32_with_gain(sum);
            }
        }
        Ok(())
    }
}

#[cfg(all(feature = "simd", any(target_arch = "x86", target_arch = "x86_64")))]
fn convolve(window: &[f32], coeff: &[f32]) -> f32 {
    if std::arch::is_x86_feature_detected!("sse2") {
        return unsafe { convolve_sse2(window, coeff) };
    }
    convolve_scalar(window, coeff)
}

#[cfg(not(all(feature = "simd", any(target_arch = "x86", target_arch = "x86_64"))))]
fn convolve(window: &[f32], coeff: &[f32]) -> f32 {
    convolve_scalar(window, coeff)
}

#[inline]
fn convolve_scalar(window: &[f32], coeff: &[f32]) -> f32 {
    window.iter().zip(coeff.iter()).map(|(w, c)| w * c).sum()
}

#[cfg(all(feature = "simd", any(target_arch = "x86", target_arch = "x86_64")))]
#[target_feature(enable = "sse2")]
unsafe fn convolve_sse2(window: &[f32], coeff: &[f32]) -> f32 {
    #[cfg(target_arch = "x86")]
    use core::arch::x86::*;
    #[cfg(target_arch = "x86_64")]
    use core::arch::x86_64::*;

    let len = window.len().min(coeff.len());
    let mut acc = unsafe { _mm_setzero_ps() };
    let mut i = 0;
    unsafe {
        while i + 4 <= len {
            let w = _mm_loadu_ps(window.as_ptr().add(i));
            let c = _mm_loadu_ps(coeff.as_ptr().add(i));
            acc = _mm_add_ps(acc, _mm_mul_ps(w, c));
            i += 4;
        }
        let mut lanes = [0.0f32; 4];
        _mm_storeu_ps(lanes.as_mut_ptr(), acc);
        let mut sum = lanes[0] + lanes[1] + lanes[2] + lanes[3];
        while i < len {
            sum += window[i] * coeff[i];
            i += 1;
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_through_delay_filter() {
        let mut fir = FarrowFirFilter::new(8, 1);
        fir.set_filter_length(4).unwrap();

        // h = [0, 1, 0, 0]: output equals the previous input sample.
        let imp = [0.0, 1.0, 0.0, 0.0];
        let input: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let mut output = vec![0.0f32; 5];
        let in_ptrs = [input.as_ptr()];
        let out_ptrs = [output.as_mut_ptr()];
        for i in 0..5 {
            unsafe {
                fir.insert_sample(&in_ptrs, i, 1).unwrap();
                fir.process_sample(&imp, &out_ptrs, i, 1).unwrap();
            }
        }
        let gain = crate::OUTPUT_GAIN;
        let expected: Vec<f32> = vec![0.0, 1.0, 2.0, 3.0, 4.0]
            .into_iter()
            .map(|x| x * gain)
            .collect();
        assert_eq!(output, expected);
    }

    #[test]
    fn convolution_matches_reference() {
        // Window longer than one SSE lane to exercise both paths.
        let window: Vec<f32> = (0..11).map(|i| (i as f32 * 0.37).sin()).collect();
        let coeff: Vec<f32> = (0..11).map(|i| (i as f32 * 0.11).cos()).collect();
        let reference: f32 = window.iter().zip(&coeff).map(|(w, c)| w * c).sum();
        let got = convolve(&window, &coeff);
        assert!((got - reference).abs() < 1e-5);
    }

    #[test]
    fn channel_bound_is_checked() {
        let mut fir = FarrowFirFilter::new(4, 1);
        fir.set_filter_length(4).unwrap();
        let input = [0.0f32];
        let ptrs = [input.as_ptr(), input.as_ptr()];
        assert!(unsafe { fir.insert_sample(&ptrs, 0, 2) }.is_err());
    }
}

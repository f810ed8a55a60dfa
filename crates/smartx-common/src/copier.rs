//! Format-converting copy between two sets of audio areas.
//!
//! A single entry point dispatches on (source format, destination format,
//! both-non-interleaved) to one of ten per-channel kernels. The three
//! like-to-like non-interleaved cases degenerate to `memcpy` plus zero
//! padding; every other kernel walks sample by sample with the per-channel
//! stride. When the destination frame count exceeds the source's, the tail
//! is padded with zeros.

use crate::area::AudioArea;
use crate::types::SampleFormat;

const FACTOR_F32_TO_I16: f32 = 32768.0;
const FACTOR_F32_TO_I32: f32 = 2147483647.0;
const FACTOR_I16_TO_F32: f32 = 1.0 / 32768.0;
const FACTOR_I32_TO_F32: f32 = 1.0 / 2147483648.0;

/// Per-channel kernel signature: destination pointer/step/frames, source
/// pointer/step/frames. Steps are in bytes.
type CopyKernel = unsafe fn(*mut u8, usize, u32, *const u8, usize, u32);

/// Copy `src_frames` frames from the source areas into the destination
/// areas, converting the sample format on the fly. Copies
/// `min(dst_channels, src_channels)` channels starting at the given channel
/// indices; pads the destination tail with zeros when it is longer.
///
/// Panics on violated caller contracts (null area bases, channel ranges out
/// of bounds), mirroring the assertion style of the surrounding DSP code.
#[allow(clippy::too_many_arguments)]
pub fn copy_audio_area_buffers(
    dst_areas: &[AudioArea],
    dst_format: SampleFormat,
    dst_offset: u32,
    dst_num_channels: u32,
    dst_chan_idx: u32,
    dst_frames: u32,
    src_areas: &[AudioArea],
    src_format: SampleFormat,
    src_offset: u32,
    src_num_channels: u32,
    src_chan_idx: u32,
    src_frames: u32,
) {
    assert!(!dst_areas.is_empty() && !src_areas.is_empty());

    let non_interleaved = dst_areas[0].is_non_interleaved(dst_format)
        && src_areas[0].is_non_interleaved(src_format);

    let kernel: CopyKernel = match (src_format, dst_format) {
        (SampleFormat::Int16, SampleFormat::Int16) => {
            if non_interleaved {
                copy_non_interleaved::<2>
            } else {
                copy_i16_to_i16
            }
        }
        (SampleFormat::Int16, SampleFormat::Int32) => copy_i16_to_i32,
        (SampleFormat::Int16, SampleFormat::Float32) => copy_i16_to_f32,
        (SampleFormat::Int32, SampleFormat::Int16) => copy_i32_to_i16,
        (SampleFormat::Int32, SampleFormat::Int32) => {
            if non_interleaved {
                copy_non_interleaved::<4>
            } else {
                copy_i32_to_i32
            }
        }
        (SampleFormat::Int32, SampleFormat::Float32) => copy_i32_to_f32,
        (SampleFormat::Float32, SampleFormat::Int16) => copy_f32_to_i16,
        (SampleFormat::Float32, SampleFormat::Int32) => copy_f32_to_i32,
        (SampleFormat::Float32, SampleFormat::Float32) => {
            if non_interleaved {
                copy_non_interleaved::<4>
            } else {
                copy_f32_to_f32
            }
        }
    };

    let num_channels = dst_num_channels.min(src_num_channels);
    assert!(num_channels + dst_chan_idx <= dst_areas[0].max_index + 1);
    assert!(num_channels + src_chan_idx <= src_areas[0].max_index + 1);

    for ch in 0..num_channels {
        let src_area = &src_areas[(ch + src_chan_idx) as usize];
        let dst_area = &dst_areas[(ch + dst_chan_idx) as usize];
        assert!(!src_area.start.is_null() && !dst_area.start.is_null());

        unsafe {
            let src_ptr = src_area.sample_ptr(src_offset) as *const u8;
            let dst_ptr = dst_area.sample_ptr(dst_offset);
            kernel(
                dst_ptr,
                dst_area.step_bytes(),
                dst_frames,
                src_ptr,
                src_area.step_bytes(),
                src_frames,
            );
        }
    }
}

/// Write zero samples into the destination areas.
pub fn zero_audio_area_buffers(
    dst_areas: &[AudioArea],
    dst_format: SampleFormat,
    dst_offset: u32,
    dst_num_channels: u32,
    dst_chan_idx: u32,
    dst_frames: u32,
) {
    assert!(!dst_areas.is_empty());
    assert!(dst_num_channels + dst_chan_idx <= dst_areas[0].max_index + 1);

    for ch in 0..dst_num_channels {
        let area = &dst_areas[(ch + dst_chan_idx) as usize];
        assert!(!area.start.is_null());
        let step = area.step_bytes();
        unsafe {
            let mut ptr = area.sample_ptr(dst_offset);
            match dst_format {
                SampleFormat::Int16 => {
                    for _ in 0..dst_frames {
                        (ptr as *mut i16).write_unaligned(0);
                        ptr = ptr.add(step);
                    }
                }
                SampleFormat::Int32 => {
                    for _ in 0..dst_frames {
                        (ptr as *mut i32).write_unaligned(0);
                        ptr = ptr.add(step);
                    }
                }
                SampleFormat::Float32 => {
                    for _ in 0..dst_frames {
                        (ptr as *mut f32).write_unaligned(0.0);
                        ptr = ptr.add(step);
                    }
                }
            }
        }
    }
}

/// Contiguous same-format channel: one memcpy plus a zeroed tail.
unsafe fn copy_non_interleaved<const SAMPLE_SIZE: usize>(
    dst: *mut u8,
    _dst_step: usize,
    dst_frames: u32,
    src: *const u8,
    _src_step: usize,
    src_frames: u32,
) {
    let copied = dst_frames.min(src_frames) as usize * SAMPLE_SIZE;
    unsafe {
        std::ptr::copy_nonoverlapping(src, dst, copied);
        if dst_frames > src_frames {
            let pad = (dst_frames - src_frames) as usize * SAMPLE_SIZE;
            std::ptr::write_bytes(dst.add(copied), 0, pad);
        }
    }
}

macro_rules! strided_kernel {
    ($name:ident, $src_ty:ty, $dst_ty:ty, $zero:expr, $convert:expr) => {
        unsafe fn $name(
            dst: *mut u8,
            dst_step: usize,
            dst_frames: u32,
            src: *const u8,
            src_step: usize,
            src_frames: u32,
        ) {
            let convert = $convert;
            let min_frames = dst_frames.min(src_frames);
            let mut d = dst;
            let mut s = src;
            unsafe {
                for _ in 0..min_frames {
                    let v = (s as *const $src_ty).read_unaligned();
                    (d as *mut $dst_ty).write_unaligned(convert(v));
                    d = d.add(dst_step);
                    s = s.add(src_step);
                }
                for _ in min_frames..dst_frames {
                    (d as *mut $dst_ty).write_unaligned($zero);
                    d = d.add(dst_step);
                }
            }
        }
    };
}

strided_kernel!(copy_i16_to_i16, i16, i16, 0, |x: i16| x);
strided_kernel!(copy_i16_to_i32, i16, i32, 0, |x: i16| (x as i32) << 16);
strided_kernel!(copy_i16_to_f32, i16, f32, 0.0, |x: i16| {
    x as f32 * FACTOR_I16_TO_F32
});
// Drop the lower 16 bit with rounding.
strided_kernel!(copy_i32_to_i16, i32, i16, 0, |x: i32| {
    (((x >> 15) + 1) >> 1) as i16
});
strided_kernel!(copy_i32_to_i32, i32, i32, 0, |x: i32| x);
strided_kernel!(copy_i32_to_f32, i32, f32, 0.0, |x: i32| {
    x as f32 * FACTOR_I32_TO_F32
});
strided_kernel!(copy_f32_to_i32, f32, i32, 0, f32_to_i32_saturating);
strided_kernel!(copy_f32_to_f32, f32, f32, 0.0, |x: f32| x);

#[inline]
fn f32_to_i32_saturating(x: f32) -> i32 {
    if x > 1.0 {
        i32::MAX
    } else if x < -1.0 {
        i32::MIN
    } else {
        (x * FACTOR_F32_TO_I32 + 0.5) as i32
    }
}

/// Scale by 32768, round to nearest-even and saturate into the i16 range.
/// The SSE path below does exactly this with cvtps/packs; the scalar
/// version must stay bit-identical so round-trip tests hold on every
/// target.
#[inline]
fn f32_to_i16_scalar(x: f32) -> i16 {
    let scaled = (x * FACTOR_F32_TO_I16).round_ties_even();
    if scaled >= i16::MAX as f32 {
        i16::MAX
    } else if scaled <= i16::MIN as f32 {
        i16::MIN
    } else {
        scaled as i16
    }
}

unsafe fn copy_f32_to_i16(
    dst: *mut u8,
    dst_step: usize,
    dst_frames: u32,
    src: *const u8,
    src_step: usize,
    src_frames: u32,
) {
    #[cfg(all(feature = "simd", any(target_arch = "x86", target_arch = "x86_64")))]
    {
        if std::arch::is_x86_feature_detected!("sse2") {
            unsafe {
                copy_f32_to_i16_sse2(dst, dst_step, dst_frames, src, src_step, src_frames);
            }
            return;
        }
    }
    unsafe {
        copy_f32_to_i16_fallback(dst, dst_step, dst_frames, src, src_step, src_frames);
    }
}

strided_kernel!(copy_f32_to_i16_fallback, f32, i16, 0, f32_to_i16_scalar);

#[cfg(all(feature = "simd", any(target_arch = "x86", target_arch = "x86_64")))]
#[target_feature(enable = "sse2")]
unsafe fn copy_f32_to_i16_sse2(
    dst: *mut u8,
    dst_step: usize,
    dst_frames: u32,
    src: *const u8,
    src_step: usize,
    src_frames: u32,
) {
    #[cfg(target_arch = "x86")]
    use core::arch::x86::*;
    #[cfg(target_arch = "x86_64")]
    use core::arch::x86_64::*;

    let factor = unsafe { _mm_set1_ps(FACTOR_F32_TO_I16) };
    let min_frames = dst_frames.min(src_frames);
    let mut d = dst;
    let mut s = src;
    unsafe {
        for _ in 0..min_frames {
            let a = _mm_set1_ps((s as *const f32).read_unaligned());
            let a = _mm_mul_ps(a, factor);
            // Convert with the current rounding mode, then saturate-pack.
            let b = _mm_cvtps_epi32(a);
            let b = _mm_packs_epi32(b, b);
            let value = _mm_cvtsi128_si32(b) as i16;
            (d as *mut i16).write_unaligned(value);
            d = d.add(dst_step);
            s = s.add(src_step);
        }
        for _ in min_frames..dst_frames {
            (d as *mut i16).write_unaligned(0);
            d = d.add(dst_step);
        }
    }
}

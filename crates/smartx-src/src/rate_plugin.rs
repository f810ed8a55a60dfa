//! C-linkage rate-converter plugin surface.
//!
//! Exposes the Farrow core through the host framework's rate-plugin
//! contract: a vtable of C functions over an opaque converter object. The
//! framework's own headers are not re-implemented here; the `#[repr(C)]`
//! types below carry exactly the fields the contract exchanges, and the
//! entry point fills the caller-provided vtable.

use std::os::raw::{c_int, c_uint, c_ulong, c_void};

use log::error;

use crate::farrow::{BufferMode, SrcFarrow};
use crate::sample::SrcSample;

const LOG: &str = "src";

/// Wire values of the two sample formats the rate plugin accepts.
pub const RATE_FORMAT_S16_LE: c_int = 2;
pub const RATE_FORMAT_S32_LE: c_int = 10;

/// Lowest and highest sample rate the converter supports.
pub const RATE_MIN: c_uint = 8_000;
pub const RATE_MAX: c_uint = 48_000;

/// Per-channel area of the framework's conversion buffers.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RateChannelArea {
    pub addr: *mut c_void,
    /// Offset of the first sample, in bits.
    pub first: c_uint,
    /// Distance between consecutive samples, in bits.
    pub step: c_uint,
}

/// One side of the conversion as reported by the framework at init time.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RateSideInfo {
    pub format: c_int,
    pub rate: c_uint,
    pub buffer_size: c_ulong,
    pub period_size: c_ulong,
}

/// Conversion parameters handed to `init` and `adjust_pitch`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RateInfo {
    pub input: RateSideInfo,
    pub output: RateSideInfo,
    pub channels: c_uint,
}

/// The callback table the entry point fills for the framework.
#[repr(C)]
pub struct RateOps {
    pub close: Option<unsafe extern "C" fn(obj: *mut c_void)>,
    pub init: Option<unsafe extern "C" fn(obj: *mut c_void, info: *const RateInfo) -> c_int>,
    pub free: Option<unsafe extern "C" fn(obj: *mut c_void)>,
    pub reset: Option<unsafe extern "C" fn(obj: *mut c_void)>,
    pub adjust_pitch:
        Option<unsafe extern "C" fn(obj: *mut c_void, info: *const RateInfo) -> c_int>,
    pub convert: Option<
        unsafe extern "C" fn(
            obj: *mut c_void,
            dst_areas: *const RateChannelArea,
            dst_offset: c_ulong,
            dst_frames: c_uint,
            src_areas: *const RateChannelArea,
            src_offset: c_ulong,
            src_frames: c_uint,
        ),
    >,
    pub input_frames: Option<unsafe extern "C" fn(obj: *mut c_void, frames: c_ulong) -> c_ulong>,
    pub output_frames: Option<unsafe extern "C" fn(obj: *mut c_void, frames: c_ulong) -> c_ulong>,
    pub version: c_uint,
    pub get_supported_rates: Option<
        unsafe extern "C" fn(obj: *mut c_void, rate_min: *mut c_uint, rate_max: *mut c_uint) -> c_int,
    >,
    pub dump: Option<unsafe extern "C" fn(obj: *mut c_void)>,
}

/// Version tag reported in the vtable.
pub const RATE_PLUGIN_VERSION: c_uint = 0x010002;

struct RateConverter {
    src: Option<SrcFarrow>,
    in_format: c_int,
    ratio: f32,
    channels: c_uint,
}

unsafe fn converter<'a>(obj: *mut c_void) -> Option<&'a mut RateConverter> {
    unsafe { (obj as *mut RateConverter).as_mut() }
}

unsafe extern "C" fn rate_init(obj: *mut c_void, info: *const RateInfo) -> c_int {
    let Some(state) = (unsafe { converter(obj) }) else {
        return -libc::EINVAL;
    };
    let Some(info) = (unsafe { info.as_ref() }) else {
        return -libc::EINVAL;
    };
    if state.src.is_none() {
        if info.input.format != info.output.format {
            error!(
                target: LOG,
                "input format {} differs from output format {}",
                info.input.format,
                info.output.format
            );
        }
        if info.input.format != RATE_FORMAT_S16_LE && info.input.format != RATE_FORMAT_S32_LE {
            error!(target: LOG, "unsupported format {}", info.input.format);
            return -libc::EINVAL;
        }
        let mut src = match SrcFarrow::new(info.channels) {
            Ok(src) => src,
            Err(e) => {
                error!(target: LOG, "cannot create converter: {e}");
                return -libc::EINVAL;
            }
        };
        src.set_buffer_mode(BufferMode::Linear);
        if let Err(e) = src.set_conversion_ratio(info.input.rate, info.output.rate) {
            error!(target: LOG, "cannot set conversion ratio: {e}");
            return -libc::EINVAL;
        }
        state.src = Some(src);
        state.in_format = info.input.format;
        state.ratio = info.input.rate as f32 / info.output.rate as f32;
        state.channels = info.channels;
    }
    0
}

unsafe extern "C" fn rate_free(obj: *mut c_void) {
    if let Some(state) = unsafe { converter(obj) } {
        state.src = None;
    }
}

unsafe extern "C" fn rate_reset(obj: *mut c_void) {
    if let Some(state) = unsafe { converter(obj) } {
        if let Some(src) = state.src.as_mut() {
            let _ = src.reset();
        }
    }
}

unsafe extern "C" fn rate_adjust_pitch(obj: *mut c_void, info: *const RateInfo) -> c_int {
    let Some(state) = (unsafe { converter(obj) }) else {
        return -libc::EINVAL;
    };
    let Some(info) = (unsafe { info.as_ref() }) else {
        return -libc::EINVAL;
    };
    if let Some(src) = state.src.as_mut() {
        if let Err(e) = src.set_conversion_ratio(info.input.rate, info.output.rate) {
            error!(target: LOG, "cannot set conversion ratio: {e}");
            return -libc::EINVAL;
        }
        state.ratio = info.input.period_size as f32 / info.output.period_size as f32;
        if let Err(e) = src.detune_pitch(
            info.input.period_size as u32,
            info.output.period_size as u32,
        ) {
            error!(target: LOG, "cannot detune pitch: {e}");
            return -libc::EINVAL;
        }
    }
    0
}

unsafe fn convert_with<T: SrcSample>(
    src: &mut SrcFarrow,
    channels: usize,
    dst_areas: *const RateChannelArea,
    dst_offset: c_ulong,
    dst_frames: c_uint,
    src_areas: *const RateChannelArea,
    src_offset: c_ulong,
    src_frames: c_uint,
) {
    let sample_bits = (std::mem::size_of::<T>() * 8) as c_uint;
    let mut outputs = Vec::with_capacity(channels);
    let mut inputs = Vec::with_capacity(channels);
    let (dst_stride, src_stride) = unsafe {
        let dst0 = &*dst_areas;
        let src0 = &*src_areas;
        (dst0.step / sample_bits, src0.step / sample_bits)
    };
    unsafe {
        for ch in 0..channels {
            let dst = &*dst_areas.add(ch);
            let srca = &*src_areas.add(ch);
            outputs.push(
                (dst.addr as *mut T)
                    .add((dst.first / sample_bits) as usize)
                    .add(dst_stride as usize * dst_offset as usize),
            );
            inputs.push(
                (srca.addr as *const T)
                    .add((srca.first / sample_bits) as usize)
                    .add(src_stride as usize * src_offset as usize),
            );
        }
        if let Err(e) = src.process_push_mode(
            &outputs,
            &inputs,
            dst_stride,
            src_stride,
            0,
            dst_frames,
            src_frames,
            channels as u32,
            1.0,
        ) {
            error!(target: LOG, "conversion failed: {e}");
        }
    }
}

unsafe extern "C" fn rate_convert(
    obj: *mut c_void,
    dst_areas: *const RateChannelArea,
    dst_offset: c_ulong,
    dst_frames: c_uint,
    src_areas: *const RateChannelArea,
    src_offset: c_ulong,
    src_frames: c_uint,
) {
    let Some(state) = (unsafe { converter(obj) }) else {
        return;
    };
    let channels = state.channels as usize;
    let format = state.in_format;
    let Some(src) = state.src.as_mut() else {
        return;
    };
    unsafe {
        match format {
            RATE_FORMAT_S32_LE => convert_with::<i32>(
                src, channels, dst_areas, dst_offset, dst_frames, src_areas, src_offset, src_frames,
            ),
            RATE_FORMAT_S16_LE => convert_with::<i16>(
                src, channels, dst_areas, dst_offset, dst_frames, src_areas, src_offset, src_frames,
            ),
            other => error!(target: LOG, "unsupported format {other}"),
        }
    }
}

unsafe extern "C" fn rate_input_frames(obj: *mut c_void, frames: c_ulong) -> c_ulong {
    match unsafe { converter(obj) } {
        Some(state) => (frames as f32 * state.ratio) as c_ulong,
        None => 0,
    }
}

unsafe extern "C" fn rate_output_frames(obj: *mut c_void, frames: c_ulong) -> c_ulong {
    match unsafe { converter(obj) } {
        Some(state) if state.ratio > 0.0 => (frames as f32 / state.ratio) as c_ulong,
        _ => 0,
    }
}

unsafe extern "C" fn rate_close(obj: *mut c_void) {
    if !obj.is_null() {
        drop(unsafe { Box::from_raw(obj as *mut RateConverter) });
    }
}

unsafe extern "C" fn rate_get_supported_rates(
    _obj: *mut c_void,
    rate_min: *mut c_uint,
    rate_max: *mut c_uint,
) -> c_int {
    unsafe {
        if !rate_min.is_null() {
            *rate_min = RATE_MIN;
        }
        if !rate_max.is_null() {
            *rate_max = RATE_MAX;
        }
    }
    0
}

unsafe extern "C" fn rate_dump(_obj: *mut c_void) {
    eprintln!("Converter: smartx");
}

/// Plugin entry: allocate the converter object and publish the vtable.
///
/// # Safety
/// `objp` and `ops` must be valid for writes; the framework owns the object
/// until it calls `close`.
#[no_mangle]
pub unsafe extern "C" fn smartx_rate_plugin_entry(
    _version: c_uint,
    objp: *mut *mut c_void,
    ops: *mut RateOps,
) -> c_int {
    if objp.is_null() || ops.is_null() {
        return -libc::EINVAL;
    }
    let state = Box::new(RateConverter {
        src: None,
        in_format: 0,
        ratio: 1.0,
        channels: 0,
    });
    unsafe {
        *objp = Box::into_raw(state) as *mut c_void;
        (*ops).close = Some(rate_close);
        (*ops).init = Some(rate_init);
        (*ops).free = Some(rate_free);
        (*ops).reset = Some(rate_reset);
        (*ops).adjust_pitch = Some(rate_adjust_pitch);
        (*ops).convert = Some(rate_convert);
        (*ops).input_frames = Some(rate_input_frames);
        (*ops).output_frames = Some(rate_output_frames);
        (*ops).version = RATE_PLUGIN_VERSION;
        (*ops).get_supported_rates = Some(rate_get_supported_rates);
        (*ops).dump = Some(rate_dump);
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;

    fn open_plugin() -> (*mut c_void, RateOps) {
        let mut obj: *mut c_void = std::ptr::null_mut();
        let mut ops = MaybeUninit::<RateOps>::zeroed();
        let rc = unsafe {
            smartx_rate_plugin_entry(RATE_PLUGIN_VERSION, &mut obj, ops.as_mut_ptr())
        };
        assert_eq!(rc, 0);
        (obj, unsafe { ops.assume_init() })
    }

    fn info(rate_in: c_uint, rate_out: c_uint, format: c_int, channels: c_uint) -> RateInfo {
        RateInfo {
            input: RateSideInfo {
                format,
                rate: rate_in,
                buffer_size: 4096,
                period_size: 1024,
            },
            output: RateSideInfo {
                format,
                rate: rate_out,
                buffer_size: 4096,
                period_size: 1024,
            },
            channels,
        }
    }

    #[test]
    fn entry_fills_vtable() {
        let (obj, ops) = open_plugin();
        assert!(ops.init.is_some());
        assert!(ops.convert.is_some());
        assert_eq!(ops.version, RATE_PLUGIN_VERSION);
        let mut lo = 0;
        let mut hi = 0;
        unsafe {
            ops.get_supported_rates.unwrap()(obj, &mut lo, &mut hi);
            ops.close.unwrap()(obj);
        }
        assert_eq!((lo, hi), (8_000, 48_000));
    }

    #[test]
    fn init_rejects_float_format() {
        let (obj, ops) = open_plugin();
        let bad = info(48_000, 48_000, 14, 2); // FLOAT_LE
        let rc = unsafe { ops.init.unwrap()(obj, &bad) };
        assert_eq!(rc, -libc::EINVAL);
        unsafe { ops.close.unwrap()(obj) };
    }

    #[test]
    fn detuned_unity_conversion_fills_block() {
        let (obj, ops) = open_plugin();
        let i = info(48_000, 48_000, RATE_FORMAT_S16_LE, 1);
        unsafe {
            assert_eq!(ops.init.unwrap()(obj, &i), 0);
            assert_eq!(ops.adjust_pitch.unwrap()(obj, &i), 0);
        }

        let mut src_buf = vec![0i16; 1024];
        let mut dst_buf = vec![0i16; 1024];
        let src_area = RateChannelArea {
            addr: src_buf.as_mut_ptr() as *mut c_void,
            first: 0,
            step: 16,
        };
        let dst_area = RateChannelArea {
            addr: dst_buf.as_mut_ptr() as *mut c_void,
            first: 0,
            step: 16,
        };
        unsafe {
            ops.convert.unwrap()(obj, &dst_area, 0, 1024, &src_area, 0, 1024);
            ops.close.unwrap()(obj);
        }
    }

    #[test]
    fn frame_estimates_follow_ratio() {
        let (obj, ops) = open_plugin();
        let i = info(48_000, 24_000, RATE_FORMAT_S16_LE, 1);
        unsafe {
            assert_eq!(ops.init.unwrap()(obj, &i), 0);
        }
        let inf = unsafe { ops.input_frames.unwrap()(obj, 512) };
        assert_eq!(inf, 1024);
        let outf = unsafe { ops.output_frames.unwrap()(obj, 1024) };
        assert_eq!(outf, 512);
        unsafe { ops.close.unwrap()(obj) };
    }
}

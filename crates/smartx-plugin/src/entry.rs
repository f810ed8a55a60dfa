//! C-linkage plugin entry point.
//!
//! The host framework's dl-loader resolves one open function per plugin;
//! this module exports it with self-contained `#[repr(C)]` argument types.
//! The entry parses the device configuration (the recognised keys are
//! `name`, `comment`, `type` and `hint`), consults `DBG_LVL` for an
//! optional log level override, builds the connector and hands its handle
//! back to the caller.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::sync::Arc;

use log::{error, LevelFilter};
use once_cell::sync::Lazy;

use smartx_common::StreamDirection;
use smartx_ringbuf::RingBufferFactory;

use crate::connector::Connector;

const LOG: &str = "connector";

/// Stream direction values of the open call.
pub const STREAM_PLAYBACK: c_int = 0;
pub const STREAM_CAPTURE: c_int = 1;

/// Non-blocking open flag.
pub const OPEN_NONBLOCK: c_int = 1;

/// One key/value pair of the device configuration.
#[repr(C)]
pub struct PluginConfigEntry {
    pub key: *const c_char,
    pub value: *const c_char,
}

/// The ring-buffer factory shared by every device this process opens.
static FACTORY: Lazy<Arc<RingBufferFactory>> = Lazy::new(|| Arc::new(RingBufferFactory::new()));

pub(crate) fn process_factory() -> Arc<RingBufferFactory> {
    Arc::clone(&FACTORY)
}

fn apply_debug_env() {
    if let Ok(level) = std::env::var("DBG_LVL") {
        if level.len() <= 1 {
            let filter = match level.as_str() {
                "0" => LevelFilter::Off,
                "1" => LevelFilter::Error,
                "2" => LevelFilter::Warn,
                "3" => LevelFilter::Info,
                "4" => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            };
            log::set_max_level(filter);
        }
    }
}

unsafe fn parse_config(
    connector: &mut Connector,
    entries: *const PluginConfigEntry,
    num_entries: usize,
) -> c_int {
    if entries.is_null() {
        return 0;
    }
    for i in 0..num_entries {
        let entry = unsafe { &*entries.add(i) };
        if entry.key.is_null() {
            continue;
        }
        let key = unsafe { CStr::from_ptr(entry.key) }.to_string_lossy();
        match key.as_ref() {
            "comment" | "type" | "hint" => {}
            "name" => {
                if !entry.value.is_null() {
                    let value = unsafe { CStr::from_ptr(entry.value) }.to_string_lossy();
                    connector.set_connection_name(&value);
                }
            }
            other => {
                error!(target: LOG, "unknown configuration field: {other}");
                return -libc::EINVAL;
            }
        }
    }
    0
}

/// Open one smartx PCM device.
///
/// On success `*connector_out` carries the connector handle the framework
/// passes back into the callback shims; it is released with
/// [`smartx_plugin_close`].
///
/// # Safety
/// `name` must be a valid C string; `entries` must point to `num_entries`
/// valid configuration records (or be null); `connector_out` must be valid
/// for a pointer write.
#[no_mangle]
pub unsafe extern "C" fn smartx_plugin_open(
    name: *const c_char,
    entries: *const PluginConfigEntry,
    num_entries: usize,
    stream: c_int,
    mode: c_int,
    connector_out: *mut *mut c_void,
) -> c_int {
    if name.is_null() || connector_out.is_null() {
        return -libc::EINVAL;
    }
    apply_debug_env();

    let device_name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
    let direction = if stream == STREAM_PLAYBACK {
        StreamDirection::Playback
    } else {
        StreamDirection::Capture
    };
    let nonblock = mode & OPEN_NONBLOCK != 0;

    let mut connector = Box::new(Connector::new(process_factory()));
    let rc = unsafe { parse_config(&mut connector, entries, num_entries) };
    if rc != 0 {
        return rc;
    }
    let rc = connector.init(&device_name, direction, nonblock);
    if rc != 0 {
        // The connector cleans its partial state up in drop.
        return rc;
    }
    unsafe { *connector_out = Box::into_raw(connector) as *mut c_void };
    0
}

/// Close a device opened with [`smartx_plugin_open`].
///
/// # Safety
/// `connector` must be a handle obtained from `smartx_plugin_open` that
/// has not been closed yet.
#[no_mangle]
pub unsafe extern "C" fn smartx_plugin_close(connector: *mut c_void) -> c_int {
    if connector.is_null() {
        return -libc::EINVAL;
    }
    drop(unsafe { Box::from_raw(connector as *mut Connector) });
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn unknown_config_key_is_rejected() {
        let key = CString::new("bogus").unwrap();
        let value = CString::new("x").unwrap();
        let entries = [PluginConfigEntry {
            key: key.as_ptr(),
            value: value.as_ptr(),
        }];
        let mut connector = Connector::new(process_factory());
        let rc = unsafe { parse_config(&mut connector, entries.as_ptr(), entries.len()) };
        assert_eq!(rc, -libc::EINVAL);
    }

    #[test]
    fn name_key_is_applied() {
        let key = CString::new("name").unwrap();
        let value = CString::new("smartx:stereo0").unwrap();
        let entries = [PluginConfigEntry {
            key: key.as_ptr(),
            value: value.as_ptr(),
        }];
        let mut connector = Connector::new(process_factory());
        let rc = unsafe { parse_config(&mut connector, entries.as_ptr(), entries.len()) };
        assert_eq!(rc, 0);
        assert_eq!(connector.connection_name(), "smartx:stereo0");
    }

    #[test]
    fn open_without_router_reports_nodev() {
        let name = CString::new("smartx_test_absent").unwrap();
        let mut out: *mut c_void = std::ptr::null_mut();
        let rc = unsafe {
            smartx_plugin_open(
                name.as_ptr(),
                std::ptr::null(),
                0,
                STREAM_PLAYBACK,
                0,
                &mut out,
            )
        };
        assert_eq!(rc, -libc::ENODEV);
        assert!(out.is_null());
    }
}

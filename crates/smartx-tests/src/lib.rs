//! Shared fixtures for the cross-crate transport scenarios; the actual
//! tests live under `tests/`.

use std::ffi::CStr;
use std::path::PathBuf;
use std::sync::Once;

static INIT: Once = Once::new();

/// Point the runtime and lock directories at a per-process scratch
/// directory and initialize logging. Returns the scratch directory.
pub fn test_runtime_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("smartx-tests-{}", std::process::id()));
    INIT.call_once(|| {
        std::fs::create_dir_all(&dir).expect("create test runtime dir");
        std::env::set_var("SMARTX_RUNTIME_DIR", &dir);
        std::env::set_var("SMARTX_LOCK_DIR", &dir);
        let _ = env_logger::builder().is_test(true).try_init();
    });
    dir
}

/// Name of the calling process's primary group, for the chown calls of
/// the shared objects.
pub fn current_group_name() -> String {
    unsafe {
        let gid = libc::getgid();
        let mut grp: libc::group = std::mem::zeroed();
        let mut buf = vec![0u8; 1024];
        let mut result: *mut libc::group = std::ptr::null_mut();
        let rc = libc::getgrgid_r(
            gid,
            &mut grp,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        );
        if rc == 0 && !result.is_null() {
            return CStr::from_ptr(grp.gr_name).to_string_lossy().into_owned();
        }
    }
    "root".to_string()
}

/// A connection name unique to this process and test.
pub fn unique_device(test: &str, suffix: &str) -> String {
    format!("smartx_{}_{test}{suffix}", std::process::id())
}

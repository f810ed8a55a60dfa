//! Filesystem roots of the transport.
//!
//! The shm root is fixed at build time (it must agree with where the
//! kernel exposes POSIX shared memory). The runtime and lock directories
//! honor a process-environment override so deployments (and tests) can
//! relocate them without a rebuild.

/// Root under which named shared-memory regions appear as files.
pub fn shm_root() -> &'static str {
    option_env!("SMARTX_SHM_ROOT").unwrap_or("/dev/shm/")
}

/// Runtime directory hosting the FIFO signal files.
pub fn runtime_dir() -> String {
    std::env::var("SMARTX_RUNTIME_DIR")
        .unwrap_or_else(|_| option_env!("SMARTX_RUNTIME_DIR").unwrap_or("/run/smartx/").to_string())
}

/// Directory hosting the per-device open-once lock files.
pub fn lock_dir() -> String {
    std::env::var("SMARTX_LOCK_DIR")
        .unwrap_or_else(|_| option_env!("SMARTX_LOCK_DIR").unwrap_or("/run/smartx/").to_string())
}

/// Group owning the shared runtime objects.
pub fn default_group() -> String {
    std::env::var("SMARTX_GROUP")
        .unwrap_or_else(|_| option_env!("SMARTX_GROUP").unwrap_or("ias_audio").to_string())
}

//! One-bit level-change signal over a named FIFO.
//!
//! The router writes a byte after each period it produced or consumed; the
//! plugin includes the FIFO's read end in the host framework's poll set so
//! `poll()`/`snd_pcm_wait()` can be satisfied from another process. The
//! FIFO lives under the runtime directory and is group-owned so both
//! processes can open it.

use std::ffi::CString;
use std::io;

use log::{info, warn};
use thiserror::Error;

use crate::paths;

const LOG: &str = "fdsignal";

#[derive(Debug, Error)]
pub enum FdSignalError {
    #[error("runtime directory {0} does not exist")]
    NoRuntimeDir(String),
    #[error("fifo already opened")]
    AlreadyOpen,
    #[error("fifo not opened")]
    NotOpen,
    #[error("fifo opened in the wrong mode")]
    WrongMode,
    #[error("creation name {created} does not match open name {requested}")]
    NameMismatch { created: String, requested: String },
    #[error("unknown group {0}")]
    UnknownGroup(String),
    #[error("fifo I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdSignalMode {
    Read,
    Write,
}

/// Named-FIFO signal endpoint.
#[derive(Debug)]
pub struct FdSignal {
    name: String,
    created: bool,
    opened: bool,
    fd: libc::c_int,
    mode: Option<FdSignalMode>,
    write_logged: bool,
}

impl Default for FdSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl FdSignal {
    pub fn new() -> Self {
        FdSignal {
            name: String::new(),
            created: false,
            opened: false,
            fd: -1,
            mode: None,
            write_logged: false,
        }
    }

    /// Replace characters the filesystem does not accept in device names.
    fn fix_name(name: &str) -> String {
        name.replace([':', ','], "_")
    }

    fn full_path(&self) -> String {
        let dir = paths::runtime_dir();
        format!("{}/{}", dir.trim_end_matches('/'), self.name)
    }

    /// Create the FIFO under the runtime directory; server side only. An
    /// existing FIFO is adopted after re-owning it to `group`.
    pub fn create(&mut self, name: &str, group: &str) -> Result<(), FdSignalError> {
        self.name = Self::fix_name(name);
        let dir = paths::runtime_dir();
        if !std::path::Path::new(&dir).exists() {
            return Err(FdSignalError::NoRuntimeDir(dir));
        }
        let full_path = self.full_path();
        let c_path = CString::new(full_path.clone()).expect("path contains no NUL");

        // Keep group write permission on the fifo regardless of the caller's
        // umask.
        let prev_mask = unsafe { libc::umask(libc::S_IWOTH) };
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o660) };
        let errno = io::Error::last_os_error();
        unsafe { libc::umask(prev_mask) };

        if rc < 0 {
            if errno.raw_os_error() == Some(libc::EEXIST) {
                change_group(&full_path, group)?;
                self.created = true;
                info!(target: LOG, "fifo {full_path} already exists");
                return Ok(());
            }
            return Err(FdSignalError::Io(errno));
        }
        change_group(&full_path, group)?;
        self.created = true;
        info!(target: LOG, "created fifo {full_path}");
        Ok(())
    }

    /// Open the FIFO non-blocking. Writers open read-write so the open does
    /// not fail with `ENXIO` while no reader is present.
    pub fn open(&mut self, name: &str, mode: FdSignalMode) -> Result<(), FdSignalError> {
        if self.opened {
            return Err(FdSignalError::AlreadyOpen);
        }
        let fixed = Self::fix_name(name);
        if self.created {
            if self.name != fixed {
                return Err(FdSignalError::NameMismatch {
                    created: self.name.clone(),
                    requested: fixed,
                });
            }
        } else {
            self.name = fixed;
        }
        let flags = libc::O_NONBLOCK
            | match mode {
                FdSignalMode::Read => libc::O_RDONLY,
                FdSignalMode::Write => libc::O_RDWR,
            };
        let full_path = self.full_path();
        let c_path = CString::new(full_path.clone()).expect("path contains no NUL");
        let fd = unsafe { libc::open(c_path.as_ptr(), flags) };
        if fd < 0 {
            return Err(FdSignalError::Io(io::Error::last_os_error()));
        }
        self.fd = fd;
        self.mode = Some(mode);
        self.opened = true;
        info!(target: LOG, "opened fifo {full_path} for {mode:?} (fd {fd})");
        Ok(())
    }

    /// File descriptor for inclusion in a poll set.
    pub fn fd(&self) -> libc::c_int {
        self.fd
    }

    /// Push one byte. A full pipe or a missing reader (`EAGAIN`) is not an
    /// error; it is logged once per episode and suppressed.
    pub fn write(&mut self) -> Result<(), FdSignalError> {
        if self.mode != Some(FdSignalMode::Write) {
            return Err(FdSignalError::WrongMode);
        }
        if self.fd < 0 {
            return Err(FdSignalError::NotOpen);
        }
        let byte = 0u8;
        let written = unsafe { libc::write(self.fd, &byte as *const u8 as *const libc::c_void, 1) };
        if written < 0 {
            let errno = io::Error::last_os_error();
            if errno.raw_os_error() == Some(libc::EAGAIN) {
                if !self.write_logged {
                    self.write_logged = true;
                    warn!(
                        target: LOG,
                        "fifo {} not writable; peer absent or fifo full", self.name
                    );
                }
                return Ok(());
            }
            return Err(FdSignalError::Io(errno));
        }
        self.write_logged = false;
        Ok(())
    }

    /// Drain the FIFO until it is empty.
    pub fn read(&mut self) -> Result<(), FdSignalError> {
        if self.mode != Some(FdSignalMode::Read) {
            return Err(FdSignalError::WrongMode);
        }
        if self.fd < 0 {
            return Err(FdSignalError::NotOpen);
        }
        let mut buf = 0u8;
        loop {
            let read =
                unsafe { libc::read(self.fd, &mut buf as *mut u8 as *mut libc::c_void, 1) };
            if read < 1 {
                return Ok(());
            }
        }
    }

    pub fn close(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
            self.fd = -1;
            self.opened = false;
        }
    }

    /// Remove the FIFO from the filesystem; creator side only.
    pub fn destroy(&mut self) {
        if !self.created {
            return;
        }
        let full_path = self.full_path();
        if std::path::Path::new(&full_path).exists() {
            if let Err(e) = std::fs::remove_file(&full_path) {
                warn!(target: LOG, "could not delete fifo {full_path}: {e}");
                return;
            }
            info!(target: LOG, "deleted fifo {full_path}");
        }
        self.created = false;
    }
}

impl Drop for FdSignal {
    fn drop(&mut self) {
        if self.opened {
            self.close();
        }
        if self.created {
            self.destroy();
        }
    }
}

/// Hand the file over to `group` and restrict it to user+group access.
pub(crate) fn change_group(path: &str, group: &str) -> Result<(), FdSignalError> {
    let gid = lookup_group(group).ok_or_else(|| FdSignalError::UnknownGroup(group.to_string()))?;
    let c_path = CString::new(path.to_string()).expect("path contains no NUL");
    let rc = unsafe { libc::chown(c_path.as_ptr(), u32::MAX, gid) };
    if rc < 0 {
        return Err(FdSignalError::Io(io::Error::last_os_error()));
    }
    Ok(())
}

pub(crate) fn lookup_group(group: &str) -> Option<libc::gid_t> {
    let c_group = CString::new(group).ok()?;
    let mut grp: libc::group = unsafe { std::mem::zeroed() };
    let mut buf = vec![0u8; 1024];
    let mut result: *mut libc::group = std::ptr::null_mut();
    let rc = unsafe {
        libc::getgrnam_r(
            c_group.as_ptr(),
            &mut grp,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() {
        return None;
    }
    Some(grp.gr_gid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_fixing() {
        assert_eq!(FdSignal::fix_name("hw:0,0_p"), "hw_0_0_p");
        assert_eq!(FdSignal::fix_name("plain"), "plain");
    }

    #[test]
    fn write_requires_open() {
        let mut s = FdSignal::new();
        assert!(matches!(s.write(), Err(FdSignalError::WrongMode)));
    }
}

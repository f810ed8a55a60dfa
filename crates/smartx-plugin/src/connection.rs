//! The per-device connection aggregate in shared memory.
//!
//! One region per device bundles everything the two processes share: the
//! two IPC endpoints (each peer pops from the other's push endpoint), the
//! hardware-constraints record, the ring-buffer-update flag and the
//! open-once mutex. The router creates the aggregate; the plugin finds it
//! by the device's fully qualified name.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info};
use thiserror::Error;

use smartx_common::{DeviceParams, DeviceType, SampleFormat};
use smartx_ipc::{AudioIpc, IpcError};
use smartx_ringbuf::{RingBuffer, RingBufferFactory, RingBufferType};
use smartx_shm::{
    Backing, FdSignal, FdSignalError, FdSignalMode, MemoryAllocator, MutexError, OpenFlag,
    RobustMutex, ShmError,
};

use crate::constraints::HwConstraints;

const LOG: &str = "connection";

const CONSTRAINTS_NAME: &str = "constraints";
const UPDATE_FLAG_NAME: &str = "updateflag";
const IPC_NAME: &str = "ipc";
const OPEN_ONCE_NAME: &str = "openonce";

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection name must not be empty")]
    EmptyName,
    #[error("connection already created or found")]
    AlreadyExists,
    #[error("connection is not initialized")]
    NotInitialized,
    #[error("only the creator may perform this operation")]
    NotAllowed,
    #[error("connection name {0} does not end in _p or _c")]
    BadNameSuffix(String),
    #[error("ipc endpoint count mismatch in shared memory")]
    IpcCountMismatch,
    #[error("shared memory error: {0}")]
    Shm(#[from] ShmError),
    #[error("mutex error: {0}")]
    Mutex(#[from] MutexError),
    #[error("ipc error: {0}")]
    Ipc(#[from] IpcError),
    #[error("fd signal error: {0}")]
    FdSignal(#[from] FdSignalError),
    #[error("ring buffer error: {0}")]
    RingBuffer(#[from] smartx_ringbuf::factory::FactoryError),
}

/// The connection aggregate. Holds the region allocator and typed
/// pointers to the records inside it.
pub struct ShmConnection {
    allocator: Option<MemoryAllocator>,
    in_ipc: *mut AudioIpc,
    out_ipc: *mut AudioIpc,
    constraints: *mut HwConstraints,
    update_available: *mut AtomicBool,
    open_once_mutex: *mut RobustMutex,
    ring_buffer: Option<RingBuffer>,
    ring_buffer_name: String,
    connection_name: String,
    group_name: String,
    is_creator: bool,
    fd_signal: FdSignal,
}

unsafe impl Send for ShmConnection {}

impl Default for ShmConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ShmConnection {
    pub fn new() -> Self {
        ShmConnection {
            allocator: None,
            in_ipc: std::ptr::null_mut(),
            out_ipc: std::ptr::null_mut(),
            constraints: std::ptr::null_mut(),
            update_available: std::ptr::null_mut(),
            open_once_mutex: std::ptr::null_mut(),
            ring_buffer: None,
            ring_buffer_name: String::new(),
            connection_name: String::new(),
            group_name: String::new(),
            is_creator: false,
            fd_signal: FdSignal::new(),
        }
    }

    fn region_size() -> usize {
        2 * std::mem::size_of::<AudioIpc>()
            + std::mem::size_of::<HwConstraints>()
            + 2 * std::mem::size_of::<i32>()
            + std::mem::size_of::<AtomicBool>()
            + std::mem::size_of::<RobustMutex>()
            + 512 // directory and alignment slack
    }

    /// Create the region and its records; router side. `in_ipc` is the
    /// endpoint this side pops from.
    pub fn create_connection(
        &mut self,
        connection_name: &str,
        group_name: &str,
    ) -> Result<(), ConnectionError> {
        if connection_name.is_empty() {
            return Err(ConnectionError::EmptyName);
        }
        if self.allocator.is_some() {
            error!(target: LOG, "connection already created");
            return Err(ConnectionError::AlreadyExists);
        }
        self.connection_name = connection_name.to_string();
        self.group_name = group_name.to_string();
        self.ring_buffer_name = format!("{connection_name}_ringbuffer");
        self.is_creator = true;

        let mut allocator = MemoryAllocator::new(
            format!("{connection_name}_connection"),
            Self::region_size(),
            Backing::Shared,
        );
        allocator.init(OpenFlag::Create)?;
        allocator.change_group(group_name).map_err(|e| {
            error!(target: LOG, "cannot change group of connection region: {e}");
            e
        })?;

        self.constraints = allocator.allocate_named::<HwConstraints>(CONSTRAINTS_NAME, 1)?;
        unsafe { *self.constraints = HwConstraints::default() };

        self.update_available = allocator.allocate_named::<AtomicBool>(UPDATE_FLAG_NAME, 1)?;
        unsafe { (*self.update_available).store(true, Ordering::Release) };

        let ipc: *mut AudioIpc = allocator.allocate_named::<AudioIpc>(IPC_NAME, 2)?;
        unsafe {
            AudioIpc::init_in_place(ipc)?;
            AudioIpc::init_in_place(ipc.add(1))?;
        }
        self.in_ipc = unsafe { ipc.add(1) };
        self.out_ipc = ipc;

        self.open_once_mutex = allocator.allocate_named::<RobustMutex>(OPEN_ONCE_NAME, 1)?;
        unsafe { RobustMutex::init_in_place(self.open_once_mutex)? };

        self.allocator = Some(allocator);
        info!(target: LOG, "created connection {connection_name}");
        Ok(())
    }

    /// (Re)create the shared ring buffer of this connection; router side.
    /// Toggles the update flag around the swap so the plugin re-finds the
    /// buffer on its next access.
    pub fn create_ring_buffer(
        &mut self,
        factory: &RingBufferFactory,
        params: &DeviceParams,
    ) -> Result<(), ConnectionError> {
        if !self.is_creator {
            error!(target: LOG, "only the router may create a ring buffer");
            return Err(ConnectionError::NotAllowed);
        }
        if self.allocator.is_none() {
            return Err(ConnectionError::NotInitialized);
        }

        unsafe { (*self.update_available).store(false, Ordering::Release) };

        if let Some(old) = self.ring_buffer.take() {
            factory.destroy_ring_buffer(old);
        }

        let mut buffer = factory.create_ring_buffer(
            params.period_size,
            params.num_periods,
            params.num_channels,
            params.data_format,
            RingBufferType::Shared,
            &self.ring_buffer_name,
            &self.group_name,
        )?;

        self.fd_signal.create(&self.connection_name, &self.group_name)?;
        self.fd_signal.open(&self.connection_name, FdSignalMode::Write)?;

        // The connection-name suffix decides the device role: `_c` marks a
        // capture device (the router writes into it), `_p` a playback
        // device (the router reads from it).
        let device_type = match self.connection_name.chars().last() {
            Some('c') => DeviceType::Sink,
            Some('p') => DeviceType::Source,
            _ => {
                error!(
                    target: LOG,
                    "connection name {} does not encode the device type",
                    self.connection_name
                );
                return Err(ConnectionError::BadNameSuffix(self.connection_name.clone()));
            }
        };
        unsafe { buffer.set_fd_signal(&mut self.fd_signal, device_type) };

        self.ring_buffer = Some(buffer);
        unsafe { (*self.update_available).store(true, Ordering::Release) };
        Ok(())
    }

    /// Connect to a previously created region; plugin side. The IPC
    /// endpoints are assigned with the opposite polarity of the creator.
    pub fn find_connection(&mut self, connection_name: &str) -> Result<(), ConnectionError> {
        if self.allocator.is_some() {
            error!(target: LOG, "connection already found");
            return Err(ConnectionError::AlreadyExists);
        }
        self.connection_name = connection_name.to_string();
        self.ring_buffer_name = format!("{connection_name}_ringbuffer");

        let mut allocator = MemoryAllocator::new(
            format!("{connection_name}_connection"),
            Self::region_size(),
            Backing::Shared,
        );
        allocator.init(OpenFlag::Connect).map_err(|e| {
            error!(target: LOG, "connection {connection_name} not found in shared memory: {e}");
            e
        })?;

        let (constraints, _) = allocator.find::<HwConstraints>(CONSTRAINTS_NAME)?;
        self.constraints = constraints;

        let (flag, _) = allocator.find::<AtomicBool>(UPDATE_FLAG_NAME)?;
        self.update_available = flag;

        let (ipc, count) = allocator.find::<AudioIpc>(IPC_NAME)?;
        if count != 2 {
            error!(target: LOG, "ipc endpoint count mismatch in shared memory");
            return Err(ConnectionError::IpcCountMismatch);
        }
        self.in_ipc = ipc;
        self.out_ipc = unsafe { ipc.add(1) };

        let (mutex, _) = allocator.find::<RobustMutex>(OPEN_ONCE_NAME)?;
        self.open_once_mutex = mutex;

        self.allocator = Some(allocator);
        Ok(())
    }

    /// The endpoint this side pops from.
    pub fn in_ipc(&self) -> Option<&AudioIpc> {
        unsafe { self.in_ipc.as_ref() }
    }

    /// The endpoint this side pushes into.
    pub fn out_ipc(&self) -> Option<&AudioIpc> {
        unsafe { self.out_ipc.as_ref() }
    }

    pub fn constraints(&self) -> Option<&HwConstraints> {
        unsafe { self.constraints.as_ref() }
    }

    pub fn constraints_mut(&mut self) -> Option<&mut HwConstraints> {
        unsafe { self.constraints.as_mut() }
    }

    pub fn open_once_mutex(&self) -> Option<&RobustMutex> {
        unsafe { self.open_once_mutex.as_ref() }
    }

    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    pub fn ring_buffer_name(&self) -> &str {
        &self.ring_buffer_name
    }

    pub fn is_creator(&self) -> bool {
        self.is_creator
    }

    /// The connection's ring buffer, re-found from shared memory when the
    /// router re-created it (update flag set) or when none is bound yet.
    pub fn verify_and_get_ring_buffer(
        &mut self,
        factory: &RingBufferFactory,
    ) -> Option<&mut RingBuffer> {
        let update = unsafe { self.update_available.as_ref() }
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false);
        if update || self.ring_buffer.is_none() {
            if let Some(old) = self.ring_buffer.take() {
                factory.lose_ring_buffer(old);
            }
            match factory.find_ring_buffer(&self.ring_buffer_name) {
                Ok(buffer) => {
                    self.ring_buffer = Some(buffer);
                    if let Some(flag) = unsafe { self.update_available.as_ref() } {
                        flag.store(false, Ordering::Release);
                    }
                }
                Err(e) => {
                    error!(target: LOG, "cannot find ring buffer {}: {e}", self.ring_buffer_name);
                    return None;
                }
            }
        }
        self.ring_buffer.as_mut()
    }

    /// Direct access to the bound ring buffer; used by the creator, whose
    /// handle carries the FD-signal binding that a re-found handle would
    /// not have.
    pub fn ring_buffer_mut(&mut self) -> Option<&mut RingBuffer> {
        self.ring_buffer.as_mut()
    }

    /// Tear down creator-owned resources. The plugin side just drops its
    /// mapping.
    pub fn close(&mut self, factory: &RingBufferFactory) {
        if let Some(buffer) = self.ring_buffer.take() {
            if self.is_creator {
                factory.destroy_ring_buffer(buffer);
            } else {
                factory.lose_ring_buffer(buffer);
            }
        }
        if self.is_creator {
            self.fd_signal.close();
            self.fd_signal.destroy();
            if !self.open_once_mutex.is_null() {
                unsafe { RobustMutex::destroy_in_place(self.open_once_mutex) };
            }
            if !self.in_ipc.is_null() {
                unsafe {
                    AudioIpc::destroy_in_place(self.in_ipc);
                    AudioIpc::destroy_in_place(self.out_ipc);
                }
            }
        }
        self.allocator = None;
    }

    /// Parameters the bound ring buffer was created with; creator side
    /// bookkeeping for tests and diagnostics.
    pub fn ring_buffer_format(&mut self) -> Option<SampleFormat> {
        self.ring_buffer.as_mut().and_then(|b| b.data_format().ok())
    }
}

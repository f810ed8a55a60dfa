//! The plugin connector: glue between the host framework's callback
//! contract and the shared-memory transport.
//!
//! Translates prepare/start/stop/drain/transfer/pointer/poll callbacks
//! into IPC handshakes and ring-buffer accesses. Transfer-path errors are
//! reported as the framework's negative errno values and never unwind;
//! every path that opened a ring-buffer access closes it again, even on
//! error, so the in-progress lock cannot leak to the peer.

use std::ffi::CString;
use std::os::raw::c_int;
use std::sync::Arc;

use log::{debug, error, info, warn};

use smartx_common::{
    copy_audio_area_buffers, zero_audio_area_buffers, RingBufferAccess, SetParameters,
    StreamDirection,
};
use smartx_ipc::{ControlCommand, CtrlMessage, Int32Message, ParamMessage, ResponseMessage};
use smartx_ringbuf::{RingBufferFactory, StreamingState};
use smartx_shm::{paths, FdSignal, FdSignalMode};

use crate::connection::ShmConnection;
use crate::host::{
    access_to_host, area_to_host, format_to_host, ConstraintPublisher, HostChannelArea, HwParam,
    IoPlugData, PluginState,
};

const LOG: &str = "connector";

const MAX_FULL_NAME_LENGTH: usize = 256;
/// Fallback blocking timeout when the sample rate is unknown.
const DEFAULT_TIMEOUT_MS: u32 = 500;
/// How long `drain` waits for the router to consume the tail.
const DRAIN_TIMEOUT_MS: u32 = 1000;

/// Transfer direction of one `transfer_job` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Playback,
    Capture,
}

pub struct Connector {
    factory: Arc<RingBufferFactory>,
    connection_name: String,
    full_name: String,
    connection: ShmConnection,
    set_params: SetParameters,
    io_plug: IoPlugData,
    transfer_areas: Vec<HostChannelArea>,
    timeout_ms: u32,
    avail_min: u64,
    /// Frames missing to the next period boundary after the last short
    /// transfer; drained with silence by `drain`.
    rest: u32,
    fd_signal: FdSignal,
    open_once_fd: c_int,
    open_once_locked: bool,
}

impl Connector {
    pub fn new(factory: Arc<RingBufferFactory>) -> Self {
        Connector {
            factory,
            connection_name: String::new(),
            full_name: String::new(),
            connection: ShmConnection::new(),
            set_params: SetParameters::default(),
            io_plug: IoPlugData::new(StreamDirection::Playback),
            transfer_areas: Vec::new(),
            timeout_ms: 0,
            avail_min: 0,
            rest: 0,
            fd_signal: FdSignal::new(),
            open_once_fd: -1,
            open_once_locked: false,
        }
    }

    /// Device name from the configuration; set by `load_config` before
    /// `init` runs.
    pub fn set_connection_name(&mut self, name: &str) {
        self.connection_name = name.to_string();
    }

    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn io_plug(&self) -> &IoPlugData {
        &self.io_plug
    }

    pub fn io_plug_mut(&mut self) -> &mut IoPlugData {
        &mut self.io_plug
    }

    /// Connect to the router and enforce the open-once contract. Returns
    /// 0 or a negative errno for the framework.
    pub fn init(&mut self, name: &str, stream: StreamDirection, nonblock: bool) -> c_int {
        if name.len() > MAX_FULL_NAME_LENGTH {
            info!(target: LOG, "device name too long ({} chars): {name}", name.len());
            return -libc::EINVAL;
        }
        self.io_plug = IoPlugData::new(stream);
        self.io_plug.nonblock = nonblock;

        self.full_name = name.replacen(':', "_", 1);
        self.full_name.push_str(stream.name_suffix());
        info!(target: LOG, "device={}: fully qualified connection name", self.full_name);

        let err = self.connect_to_router();
        if err != 0 {
            error!(target: LOG, "device={}: connect failed", self.full_name);
            return err;
        }

        if self.fd_signal.open(&self.full_name, FdSignalMode::Read).is_err() {
            return -libc::EBADFD;
        }
        self.io_plug.poll_events = libc::POLLIN;
        self.io_plug.poll_fd = self.fd_signal.fd();

        if stream == StreamDirection::Playback {
            let Some(ring_buffer) = self.connection.verify_and_get_ring_buffer(&self.factory)
            else {
                return -libc::EBADFD;
            };
            ring_buffer.reset_from_writer();
            if nonblock {
                // Keep the router from consuming until the first start.
                let _ = ring_buffer.set_streaming_state(StreamingState::StopRead);
            }
        }
        0
    }

    fn connect_to_router(&mut self) -> c_int {
        if self.connection.find_connection(&self.full_name).is_err() {
            error!(
                target: LOG,
                "device={}: plugin cannot be connected to the router", self.full_name
            );
            return -libc::ENODEV;
        }

        // Open-once contract: an advisory-locked file holding the owner's
        // pid. Taking the lock and finding our own pid means this process
        // already opened the device through another handle.
        let lock_dir = paths::lock_dir();
        let lock_path = format!("{}/{}.lock", lock_dir.trim_end_matches('/'), self.full_name);
        let c_path = match CString::new(lock_path.clone()) {
            Ok(p) => p,
            Err(_) => return -libc::EINVAL,
        };
        let fd = unsafe {
            libc::open(
                c_path.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_SYNC,
                0o660,
            )
        };
        if fd < 0 {
            let err = std::io::Error::last_os_error();
            let errno = err.raw_os_error().unwrap_or(libc::EINVAL);
            error!(
                target: LOG,
                "device={}: error creating or opening open once lock: {err}", self.full_name
            );
            return -errno;
        }
        self.open_once_fd = fd;

        let rc = unsafe { libc::lockf(fd, libc::F_TLOCK, 0) };
        if rc == 0 {
            let my_pid = unsafe { libc::getpid() };
            let mut pid_in_file: libc::pid_t = 0;
            let bytes = unsafe {
                libc::read(
                    fd,
                    &mut pid_in_file as *mut libc::pid_t as *mut libc::c_void,
                    std::mem::size_of::<libc::pid_t>(),
                )
            };
            if bytes < 0 {
                error!(
                    target: LOG,
                    "device={}: error reading open once lock: {}",
                    self.full_name,
                    std::io::Error::last_os_error()
                );
                return -libc::EINVAL;
            }
            if pid_in_file == my_pid {
                error!(
                    target: LOG,
                    "device={}: already opened by this process (pid {my_pid})", self.full_name
                );
                return -libc::EBUSY;
            }
            if unsafe { libc::lseek(fd, 0, libc::SEEK_SET) } < 0 {
                error!(
                    target: LOG,
                    "device={}: error rewinding open once lock", self.full_name
                );
                return -libc::EBUSY;
            }
            let bytes = unsafe {
                libc::write(
                    fd,
                    &my_pid as *const libc::pid_t as *const libc::c_void,
                    std::mem::size_of::<libc::pid_t>(),
                )
            };
            if bytes < 0 {
                error!(
                    target: LOG,
                    "device={}: error writing open once lock: {}",
                    self.full_name,
                    std::io::Error::last_os_error()
                );
                return -libc::EINVAL;
            }
            info!(
                target: LOG,
                "device={}: locked {lock_path} (pid {my_pid})", self.full_name
            );
            self.open_once_locked = true;
            0
        } else {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EINVAL);
            if errno == libc::EACCES || errno == libc::EAGAIN {
                error!(target: LOG, "device={}: already opened", self.full_name);
                -libc::EBUSY
            } else {
                error!(
                    target: LOG,
                    "device={}: error locking the open once file (errno {errno})", self.full_name
                );
                -libc::EINVAL
            }
        }
    }

    /// Publish the router's hardware constraints to the framework: a
    /// non-empty list is forwarded as an enumeration, otherwise the
    /// (min, max) pair; each layout yields both transport flavours.
    pub fn define_hw_constraints(&mut self, publisher: &mut dyn ConstraintPublisher) -> c_int {
        let Some(constraints) = self.connection.constraints() else {
            error!(target: LOG, "device={}: no hardware constraints present", self.full_name);
            return -libc::EBADFD;
        };
        let constraints = *constraints;

        if constraints.is_valid == 0 {
            error!(
                target: LOG,
                "device={}: hardware constraints are not initialized", self.full_name
            );
            return -libc::EAGAIN;
        }

        if constraints.formats.is_empty() {
            error!(target: LOG, "device={}: format list not filled", self.full_name);
            return -libc::EINVAL;
        }
        let formats: Vec<u32> = constraints.formats().map(format_to_host).collect();
        let err = publisher.set_param_list(HwParam::Format, &formats);
        if err < 0 {
            return err;
        }

        if constraints.access.is_empty() {
            error!(target: LOG, "device={}: access list not filled", self.full_name);
            return -libc::EINVAL;
        }
        let mut access: Vec<u32> = Vec::with_capacity(constraints.access.len() * 2);
        for layout in constraints.access_layouts() {
            access.push(access_to_host(layout, smartx_common::AccessType::Rw));
            access.push(access_to_host(layout, smartx_common::AccessType::Mmap));
        }
        let err = publisher.set_param_list(HwParam::Access, &access);
        if err < 0 {
            return err;
        }

        let ranges = [
            (HwParam::Channels, constraints.channels.list.as_slice(), constraints.channels.min, constraints.channels.max),
            (HwParam::Rate, constraints.rate.list.as_slice(), constraints.rate.min, constraints.rate.max),
            (HwParam::PeriodBytes, constraints.period_size.list.as_slice(), constraints.period_size.min, constraints.period_size.max),
            (HwParam::Periods, constraints.period_count.list.as_slice(), constraints.period_count.min, constraints.period_count.max),
        ];
        for (param, list, min, max) in ranges {
            let err = if list.is_empty() {
                publisher.set_param_minmax(param, min, max)
            } else {
                publisher.set_param_list(param, list)
            };
            if err < 0 {
                return err;
            }
        }
        0
    }

    /// Snapshot the framework's negotiated parameters, validate them and
    /// run the Parameters handshake with the router.
    pub fn set_hw_params(&mut self) -> c_int {
        self.set_params.num_channels = self.io_plug.channels;
        if self.set_params.num_channels == 0 {
            error!(target: LOG, "device={}: requested channel count not supported", self.full_name);
            return -libc::EINVAL;
        }

        self.set_params.sample_rate = self.io_plug.rate;
        if self.set_params.sample_rate == 0 {
            error!(target: LOG, "device={}: requested sample rate not supported", self.full_name);
            return -libc::EINVAL;
        }

        let Some(format) = self.io_plug.format else {
            error!(target: LOG, "device={}: requested sample format not supported", self.full_name);
            return -libc::EINVAL;
        };
        self.set_params.data_format = format;

        if self.io_plug.period_size > u32::MAX as u64 || self.io_plug.buffer_size > u32::MAX as u64
        {
            error!(
                target: LOG,
                "device={}: period or buffer size exceeds a 32 bit frame counter", self.full_name
            );
            return -libc::EINVAL;
        }
        self.set_params.period_size = self.io_plug.period_size as u32;
        if self.set_params.period_size == 0 {
            error!(target: LOG, "device={}: period size was zero", self.full_name);
            return -libc::EINVAL;
        }

        let period_count = self.io_plug.buffer_size as f32 / self.io_plug.period_size as f32;
        self.set_params.num_periods = (period_count + 0.1) as u32;
        if period_count - self.set_params.num_periods as f32 > 0.01 {
            error!(
                target: LOG,
                "device={}: buffer size is not a multiple of the period size ({period_count})",
                self.full_name
            );
            return -libc::EINVAL;
        }

        // Blocking timeout: the duration of the whole ring buffer.
        self.timeout_ms = if self.set_params.sample_rate != 0 {
            self.set_params.num_periods * self.set_params.period_size
                / (self.set_params.sample_rate / 1000)
        } else {
            DEFAULT_TIMEOUT_MS
        };

        self.transfer_areas =
            vec![HostChannelArea::default(); self.set_params.num_channels as usize];

        let Some(out_ipc) = self.connection.out_ipc() else {
            return -libc::EBADFD;
        };
        if let Err(e) = out_ipc.push(&ParamMessage::new(ControlCommand::Parameters, &self.set_params))
        {
            error!(target: LOG, "device={}: no IPC package can be sent: {e}", self.full_name);
            return -libc::EIO;
        }
        self.await_response(ControlCommand::Parameters)
    }

    /// Wait for the ACK/NAK answering `request`; mismatched responses are
    /// logged and skipped.
    fn await_response(&self, request: ControlCommand) -> c_int {
        let Some(in_ipc) = self.connection.in_ipc() else {
            return -libc::EBADFD;
        };
        loop {
            match in_ipc.pop::<ResponseMessage>() {
                Ok(response) => {
                    if response.control() == Some(request) {
                        if response.is_ack() {
                            debug!(target: LOG, "device={}: {request} acknowledged", self.full_name);
                            return 0;
                        }
                        error!(
                            target: LOG,
                            "device={}: router rejected the {request} request", self.full_name
                        );
                        return -libc::EINVAL;
                    }
                    error!(
                        target: LOG,
                        "device={}: wrong response {:?} to {request}", self.full_name,
                        response.control()
                    );
                }
                Err(e) => {
                    error!(target: LOG, "device={}: error during IPC receive: {e}", self.full_name);
                    return -libc::EIO;
                }
            }
        }
    }

    /// Forward the framework's `avail_min` into the ring buffer.
    pub fn set_sw_params(&mut self, avail_min: u64) -> c_int {
        self.avail_min = avail_min;
        let Some(ring_buffer) = self.connection.verify_and_get_ring_buffer(&self.factory) else {
            return -libc::EBADFD;
        };
        ring_buffer.set_avail_min(avail_min as u32);
        info!(target: LOG, "device={}: set avail_min to {avail_min}", self.full_name);
        0
    }

    /// The framework's prepare callback: re-verify the ring buffer (it may
    /// have been re-created by the router) and, for playback, reset it —
    /// this is the recovery path the framework takes after an xrun.
    pub fn prepare(&mut self) -> c_int {
        let stream = self.io_plug.stream;
        let Some(ring_buffer) = self.connection.verify_and_get_ring_buffer(&self.factory) else {
            return 0;
        };
        if stream == StreamDirection::Playback {
            ring_buffer.reset_from_writer();
        }
        self.io_plug.state = PluginState::Prepared;
        0
    }

    pub fn start(&mut self) -> c_int {
        if self.io_plug.stream == StreamDirection::Playback {
            info!(target: LOG, "device={}: starting playback", self.full_name);
            let Some(ring_buffer) = self.connection.verify_and_get_ring_buffer(&self.factory)
            else {
                return -libc::EBADFD;
            };
            let _ = ring_buffer.set_streaming_state(StreamingState::Running);
        }
        self.control_request(ControlCommand::Start)
    }

    pub fn stop(&mut self) -> c_int {
        self.control_request(ControlCommand::Stop)
    }

    fn control_request(&mut self, request: ControlCommand) -> c_int {
        let Some(out_ipc) = self.connection.out_ipc() else {
            return -libc::EBADFD;
        };
        if let Err(e) = out_ipc.push(&CtrlMessage::new(request)) {
            error!(target: LOG, "device={}: no IPC package can be sent: {e}", self.full_name);
            return -libc::EIO;
        }
        self.await_response(request)
    }

    /// Pad the ring buffer to the next period boundary with silence and
    /// let the router consume it; playback only. A timeout is logged but
    /// not fatal.
    pub fn drain(&mut self) -> c_int {
        if self.io_plug.stream != StreamDirection::Playback {
            return 0;
        }
        let rest = self.rest;
        let num_periods = self.set_params.num_periods;
        let format = self.set_params.data_format;
        let num_channels = self.set_params.num_channels;
        let full_name = self.full_name.clone();
        let Some(ring_buffer) = self.connection.verify_and_get_ring_buffer(&self.factory) else {
            return 0;
        };
        if rest > 0 {
            let mut frames = rest;
            match ring_buffer.begin_access(RingBufferAccess::Write, &mut frames) {
                Ok(offset) => {
                    info!(
                        target: LOG,
                        "device={full_name}: draining, filling {frames} of {rest} rest frames"
                    );
                    zero_audio_area_buffers(
                        ring_buffer.areas(),
                        format,
                        offset,
                        num_channels,
                        0,
                        frames,
                    );
                    if let Err(e) = ring_buffer.end_access(RingBufferAccess::Write, offset, frames)
                    {
                        error!(target: LOG, "device={full_name}: error during endAccess: {e}");
                    }
                }
                Err(e) => {
                    error!(target: LOG, "device={full_name}: error during beginAccess: {e}");
                    let _ = ring_buffer.end_access(RingBufferAccess::Write, 0, 0);
                }
            }
            self.rest = 0;
        }
        match ring_buffer.wait_write(num_periods, DRAIN_TIMEOUT_MS) {
            Ok(()) => {
                if let Ok(free) = ring_buffer.update_available(RingBufferAccess::Write) {
                    info!(target: LOG, "device={full_name}: free space after drain={free}");
                }
            }
            Err(smartx_ringbuf::RingBufferError::Timeout) => {
                if let Ok(free) = ring_buffer.update_available(RingBufferAccess::Write) {
                    warn!(
                        target: LOG,
                        "device={full_name}: timeout during drain, free space={free}"
                    );
                }
            }
            Err(e) => {
                error!(target: LOG, "device={full_name}: error during drain wait: {e}");
            }
        }
        0
    }

    /// Inner loop of both transfer directions; returns the transferred
    /// frame count or a negative errno.
    pub fn transfer_job(
        &mut self,
        areas: &[HostChannelArea],
        offset: u64,
        size: u64,
        direction: TransferDirection,
    ) -> i64 {
        if size == 0 {
            return 0;
        }
        if size > u32::MAX as u64 {
            error!(
                target: LOG,
                "device={}: transfer too long: size={size}", self.full_name
            );
        }
        let mut shm_frames = size as u32;
        let shm_access = match direction {
            TransferDirection::Playback => RingBufferAccess::Write,
            TransferDirection::Capture => RingBufferAccess::Read,
        };
        let nonblock = self.io_plug.nonblock;
        let timeout = self.timeout_ms;
        let num_channels = self.set_params.num_channels;
        let period_size = self.set_params.period_size;
        let format = self.set_params.data_format;
        let full_name = self.full_name.clone();

        let factory = Arc::clone(&self.factory);
        let Some(ring_buffer) = self.connection.verify_and_get_ring_buffer(&factory) else {
            error!(target: LOG, "device={full_name}: no ring buffer available");
            return -libc::EBADFD as i64;
        };

        if !nonblock {
            let wait_result = match direction {
                TransferDirection::Playback => ring_buffer.wait_write(1, timeout),
                TransferDirection::Capture => ring_buffer.wait_read(1, timeout),
            };
            match wait_result {
                Ok(()) => {}
                Err(smartx_ringbuf::RingBufferError::Timeout) => {
                    debug!(target: LOG, "device={full_name}: timeout waiting for the ring buffer");
                    return 0;
                }
                Err(e) => {
                    error!(target: LOG, "device={full_name}: error during wait: {e}");
                    return 0;
                }
            }
        }

        let shm_offset = match ring_buffer.begin_access(shm_access, &mut shm_frames) {
            Ok(offset) => offset,
            Err(e) => {
                error!(target: LOG, "device={full_name}: cannot acquire buffer access: {e}");
                self.io_plug.state = PluginState::Xrun;
                // Clean up the half-opened access without advancing any
                // pointer.
                let _ = ring_buffer.end_access(shm_access, 0, 0);
                return -libc::EPIPE as i64;
            }
        };

        if shm_frames == 0 {
            return if !nonblock {
                error!(target: LOG, "device={full_name}: xrun, no more space/samples in buffer");
                self.io_plug.state = PluginState::Xrun;
                let _ = ring_buffer.end_access(shm_access, shm_offset, 0);
                -libc::EPIPE as i64
            } else {
                let _ = ring_buffer.end_access(shm_access, shm_offset, 0);
                -libc::EAGAIN as i64
            };
        }

        if ring_buffer.areas()[0].max_index + 1 != num_channels {
            error!(target: LOG, "device={full_name}: channel count mismatch in transfer");
            let _ = ring_buffer.end_access(shm_access, shm_offset, shm_frames);
            return -libc::EINVAL as i64;
        }

        for (i, area) in ring_buffer.areas().iter().enumerate() {
            self.transfer_areas[i] = area_to_host(area);
        }

        let frames = (size as u32).min(shm_frames);
        if frames < period_size {
            // Remember the tail so drain can pad to the period boundary.
            self.rest = period_size - frames;
        }

        let shm_areas = ring_buffer.areas().to_vec();
        let host_areas: Vec<smartx_common::AudioArea> = areas
            .iter()
            .enumerate()
            .map(|(i, a)| crate::host::area_from_host(a, i as u32, areas.len() as u32 - 1))
            .collect();

        match direction {
            TransferDirection::Playback => copy_audio_area_buffers(
                &shm_areas,
                format,
                shm_offset,
                num_channels,
                0,
                frames,
                &host_areas,
                format,
                offset as u32,
                num_channels,
                0,
                frames,
            ),
            TransferDirection::Capture => copy_audio_area_buffers(
                &host_areas,
                format,
                offset as u32,
                num_channels,
                0,
                frames,
                &shm_areas,
                format,
                shm_offset,
                num_channels,
                0,
                frames,
            ),
        }

        // Acknowledge one period's worth of level change on the signal.
        let _ = self.fd_signal.read();

        if let Err(e) = ring_buffer.end_access(shm_access, shm_offset, frames) {
            error!(target: LOG, "device={full_name}: cannot end the buffer access: {e}");
            return -libc::EPIPE as i64;
        }
        frames as i64
    }

    /// The framework's pointer callback: reports the router's progress,
    /// i.e. the opposite direction's offset (the router's write offset for
    /// capture, its read offset for playback).
    pub fn frame_pointer(&mut self) -> i64 {
        if self.io_plug.state == PluginState::Xrun {
            return -libc::EPIPE as i64;
        }
        let stream = self.io_plug.stream;
        let Some(ring_buffer) = self.connection.verify_and_get_ring_buffer(&self.factory) else {
            return -libc::EBADFD as i64;
        };
        let offset = match stream {
            StreamDirection::Capture => ring_buffer.write_offset(),
            StreamDirection::Playback => ring_buffer.read_offset(),
        };
        offset as i64
    }

    /// Frames currently available in the transfer direction.
    pub fn real_avail(&mut self) -> i64 {
        let stream = self.io_plug.stream;
        let Some(ring_buffer) = self.connection.verify_and_get_ring_buffer(&self.factory) else {
            return 0;
        };
        let access = match stream {
            StreamDirection::Capture => RingBufferAccess::Read,
            StreamDirection::Playback => RingBufferAccess::Write,
        };
        ring_buffer.update_available(access).map(|a| a as i64).unwrap_or(0)
    }

    /// Map the signal's `POLLIN` edge into the event the framework expects
    /// for the stream direction. Exactly one poll fd is supported.
    pub fn handle_poll_revents(&self, pfds: &[libc::pollfd], revents: &mut i16) -> c_int {
        if pfds.len() != 1 {
            error!(
                target: LOG,
                "device={}: unexpected poll descriptor count {}", self.full_name,
                pfds.len()
            );
            return -libc::EINVAL;
        }
        *revents = pfds[0].revents & !(libc::POLLIN | libc::POLLOUT);
        if pfds[0].revents & libc::POLLIN != 0 {
            *revents |= match self.io_plug.stream {
                StreamDirection::Playback => libc::POLLOUT,
                StreamDirection::Capture => libc::POLLIN,
            };
        }
        0
    }

    /// GetLatency handshake: the router's path delay in frames.
    pub fn path_delay(&mut self, frames: &mut i64) -> c_int {
        let Some(out_ipc) = self.connection.out_ipc() else {
            return -libc::EBADFD;
        };
        if let Err(e) = out_ipc.push(&CtrlMessage::new(ControlCommand::GetLatency)) {
            error!(target: LOG, "device={}: no IPC package can be sent: {e}", self.full_name);
            return -libc::EIO;
        }
        let Some(in_ipc) = self.connection.in_ipc() else {
            return -libc::EBADFD;
        };
        match in_ipc.pop::<Int32Message>() {
            Ok(response) => {
                if response.control() == Some(ControlCommand::GetLatency) {
                    *frames = response.value as i64;
                } else {
                    error!(target: LOG, "device={}: wrong latency response", self.full_name);
                }
                0
            }
            Err(e) => {
                error!(target: LOG, "device={}: error during IPC receive: {e}", self.full_name);
                -libc::EIO
            }
        }
    }

    /// Release every held resource: the FD signal, the connection mapping
    /// and the open-once lock (truncate, unlock, close).
    pub fn close(&mut self) {
        self.fd_signal.close();
        self.transfer_areas.clear();
        self.connection.close(&self.factory);
        self.close_open_once_file();
    }

    fn close_open_once_file(&mut self) {
        if self.open_once_fd < 0 {
            return;
        }
        let fd = self.open_once_fd;
        unsafe {
            // Only the lock holder clears the file; a failed open must not
            // wipe the holder's pid.
            if self.open_once_locked {
                if libc::ftruncate(fd, 0) == 0 {
                    if libc::lockf(fd, libc::F_ULOCK, 0) == 0 {
                        info!(target: LOG, "device={}: unlocked open once lock", self.full_name);
                    } else {
                        error!(
                            target: LOG,
                            "device={}: cannot unlock open once lock: {}",
                            self.full_name,
                            std::io::Error::last_os_error()
                        );
                    }
                } else {
                    error!(
                        target: LOG,
                        "device={}: cannot truncate open once lock: {}",
                        self.full_name,
                        std::io::Error::last_os_error()
                    );
                }
            }
            libc::close(fd);
        }
        self.open_once_fd = -1;
        self.open_once_locked = false;
    }

    /// Parameters negotiated in the last `set_hw_params` round.
    pub fn current_params(&self) -> &SetParameters {
        &self.set_params
    }

    /// The ring-buffer channel areas of the last transfer, in the host
    /// framework's layout; valid until the next transfer. Framework
    /// adapters that expose mmap access read them from here.
    pub fn transfer_areas(&self) -> &[HostChannelArea] {
        &self.transfer_areas
    }

    /// Blocking timeout derived from the negotiated ring-buffer duration.
    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    #[cfg(test)]
    pub(crate) fn set_rest_for_test(&mut self, rest: u32) {
        self.rest = rest;
    }

    pub fn rest(&self) -> u32 {
        self.rest
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.close();
    }
}

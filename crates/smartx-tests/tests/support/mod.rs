//! Router-side emulation for the bridge scenarios: creates the shared
//! connection and ring buffer the plugin connects to, and answers the
//! plugin's control requests the way the real router does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use smartx_common::DeviceParams;
use smartx_ipc::{
    AudioIpc, ControlCommand, CtrlMessage, Int32Message, IpcError, ParamMessage, ResponseMessage,
};
use smartx_plugin::ShmConnection;
use smartx_ringbuf::RingBufferFactory;

/// Path delay the mock router reports for GetLatency.
pub const MOCK_LATENCY_FRAMES: i32 = 128;

struct IpcHandles {
    pop_from: *const AudioIpc,
    push_to: *const AudioIpc,
}

unsafe impl Send for IpcHandles {}

pub struct MockRouter {
    pub connection: ShmConnection,
    pub factory: Arc<RingBufferFactory>,
    stop: Arc<AtomicBool>,
    responder: Option<JoinHandle<()>>,
}

impl MockRouter {
    /// Create the connection region and the shared ring buffer for
    /// `device` (fully qualified name, `_p`/`_c` suffix included).
    pub fn create(device: &str, params: &DeviceParams) -> MockRouter {
        smartx_tests::test_runtime_dir();
        let group = smartx_tests::current_group_name();
        let factory = Arc::new(RingBufferFactory::new());
        let mut connection = ShmConnection::new();
        connection
            .create_connection(device, &group)
            .expect("create connection");
        connection
            .create_ring_buffer(&factory, params)
            .expect("create ring buffer");
        if let Some(constraints) = connection.constraints_mut() {
            constraints.is_valid = 1;
            constraints.push_format(params.data_format);
            constraints.push_access(smartx_common::AccessLayout::NonInterleaved);
            constraints.channels.list.push(params.num_channels);
            constraints.rate.list.push(params.sample_rate);
            constraints.period_count.list.push(params.num_periods);
        }
        MockRouter {
            connection,
            factory,
            stop: Arc::new(AtomicBool::new(false)),
            responder: None,
        }
    }

    /// Answer every control request with ACK and every latency request
    /// with [`MOCK_LATENCY_FRAMES`] until the router is dropped.
    pub fn spawn_responder(&mut self) {
        let handles = IpcHandles {
            pop_from: self.connection.in_ipc().expect("router in ipc"),
            push_to: self.connection.out_ipc().expect("router out ipc"),
        };
        let stop = Arc::clone(&self.stop);
        self.responder = Some(std::thread::spawn(move || {
            let handles = handles;
            let pop_from = unsafe { &*handles.pop_from };
            let push_to = unsafe { &*handles.push_to };
            while !stop.load(Ordering::Acquire) {
                match pop_from.pop_timed_wait::<CtrlMessage>(50) {
                    Ok(msg) => match msg.control() {
                        Some(ControlCommand::GetLatency) => {
                            let _ = push_to.push(&Int32Message::new(
                                ControlCommand::GetLatency,
                                MOCK_LATENCY_FRAMES,
                            ));
                        }
                        Some(request) => {
                            let _ = push_to
                                .push(&ResponseMessage::new(request, ControlCommand::Ack));
                        }
                        None => {}
                    },
                    Err(IpcError::InvalidParam) => {
                        // Not a bare control message; a parameters record.
                        if let Ok(msg) = pop_from.pop_noblock::<ParamMessage>() {
                            if msg.control() == Some(ControlCommand::Parameters) {
                                let _ = push_to.push(&ResponseMessage::new(
                                    ControlCommand::Parameters,
                                    ControlCommand::Ack,
                                ));
                            }
                        } else {
                            let _ = pop_from.discard_next();
                        }
                    }
                    Err(_) => {}
                }
            }
        }));
    }
}

impl Drop for MockRouter {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.responder.take() {
            let _ = handle.join();
        }
        self.connection.close(&self.factory);
    }
}

/// Default device parameters of the scenarios: stereo float, 1024-frame
/// periods, four periods.
pub fn default_params(name: &str) -> DeviceParams {
    DeviceParams::new(
        name,
        2,
        48_000,
        smartx_common::SampleFormat::Float32,
        1024,
        4,
    )
}

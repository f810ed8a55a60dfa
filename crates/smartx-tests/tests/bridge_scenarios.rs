//! End-to-end scenarios across the whole bridge: connection setup, the
//! parameters handshake, open-once enforcement, xrun propagation, drain
//! padding and the FD-signal poll path.

mod support;

use std::sync::Arc;

use smartx_common::{RingBufferAccess, SampleFormat, StreamDirection};
use smartx_plugin::host::HostChannelArea;
use smartx_plugin::connector::{Connector, TransferDirection};
use smartx_ringbuf::{RingBufferFactory, StreamingState};
use smartx_tests::unique_device;
use support::{default_params, MockRouter};

fn plugin_connector() -> Connector {
    Connector::new(Arc::new(RingBufferFactory::new()))
}

/// Areas over a caller-owned non-interleaved f32 buffer in the host
/// framework's layout.
fn host_areas(buf: &mut [f32], channels: u32, frames: u32) -> Vec<HostChannelArea> {
    (0..channels)
        .map(|i| HostChannelArea {
            addr: buf.as_mut_ptr() as *mut std::os::raw::c_void,
            first: i * frames * 32,
            step: 32,
        })
        .collect()
}

fn negotiate(connector: &mut Connector) {
    let io = connector.io_plug_mut();
    io.channels = 2;
    io.rate = 48_000;
    io.format = Some(SampleFormat::Float32);
    io.period_size = 1024;
    io.buffer_size = 4096;
    assert_eq!(connector.set_hw_params(), 0);
}

#[test]
fn set_parameters_handshake() {
    let device = unique_device("hs", "_p");
    let mut router = MockRouter::create(&device, &default_params(&device));
    router.spawn_responder();

    let mut connector = plugin_connector();
    assert_eq!(
        connector.init(&device[..device.len() - 2], StreamDirection::Playback, false),
        0
    );
    negotiate(&mut connector);

    let params = connector.current_params();
    assert_eq!(params.num_periods, 4);
    assert_eq!(params.period_size, 1024);
    // Ring-buffer duration: 4 * 1024 frames at 48 frames per ms.
    assert_eq!(connector.timeout_ms(), 85);

    // Start and stop complete with matching acknowledgements.
    assert_eq!(connector.start(), 0);
    assert_eq!(connector.stop(), 0);

    // And the latency handshake reports the router's path delay.
    let mut delay = 0i64;
    assert_eq!(connector.path_delay(&mut delay), 0);
    assert_eq!(delay, support::MOCK_LATENCY_FRAMES as i64);
}

#[test]
fn open_once_is_enforced_per_process() {
    let device = unique_device("oo", "_p");
    let mut router = MockRouter::create(&device, &default_params(&device));
    router.spawn_responder();
    let base = &device[..device.len() - 2];

    let mut first = plugin_connector();
    assert_eq!(first.init(base, StreamDirection::Playback, false), 0);

    // A second open of the same device in the same process is refused.
    let mut second = plugin_connector();
    assert_eq!(second.init(base, StreamDirection::Playback, false), -libc::EBUSY);
    drop(second);

    // Releasing the first handle makes the device available again.
    drop(first);
    let mut third = plugin_connector();
    assert_eq!(third.init(base, StreamDirection::Playback, false), 0);
}

#[test]
fn playback_xrun_propagation() {
    let device = unique_device("xr", "_p");
    let mut router = MockRouter::create(&device, &default_params(&device));
    router.spawn_responder();

    let mut connector = plugin_connector();
    assert_eq!(
        connector.init(&device[..device.len() - 2], StreamDirection::Playback, false),
        0
    );
    negotiate(&mut connector);

    // Gate the writer the way the router does while the stream is stopped.
    let gate_factory = RingBufferFactory::new();
    let mut gate = gate_factory
        .find_ring_buffer(&format!("{device}_ringbuffer"))
        .expect("find shared ring buffer");
    gate.set_streaming_state(StreamingState::StopWrite).unwrap();

    let mut frames = vec![0.0f32; 2 * 1024];
    let areas = host_areas(&mut frames, 2, 1024);
    let rc = connector.transfer_job(&areas, 0, 1024, TransferDirection::Playback);
    assert_eq!(rc, -libc::EPIPE as i64);

    // The xrun is visible through the pointer callback until recovery.
    assert_eq!(connector.frame_pointer(), -libc::EPIPE as i64);

    // The framework's recovery path: prepare resets the buffer and clears
    // the xrun, after which transfers work again.
    gate.set_streaming_state(StreamingState::Running).unwrap();
    assert_eq!(connector.prepare(), 0);
    assert_eq!(connector.frame_pointer(), 0);
    let rc = connector.transfer_job(&areas, 0, 1024, TransferDirection::Playback);
    assert_eq!(rc, 1024);

    gate_factory.lose_ring_buffer(gate);
}

#[test]
fn short_transfer_then_drain_pads_to_period() {
    let device = unique_device("dr", "_p");
    let mut router = MockRouter::create(&device, &default_params(&device));
    router.spawn_responder();

    let mut connector = plugin_connector();
    assert_eq!(
        connector.init(&device[..device.len() - 2], StreamDirection::Playback, false),
        0
    );
    negotiate(&mut connector);

    // A short final transfer leaves a 324-frame tail to the next period.
    let mut frames = vec![0.5f32; 2 * 1024];
    let areas = host_areas(&mut frames, 2, 1024);
    let rc = connector.transfer_job(&areas, 0, 700, TransferDirection::Playback);
    assert_eq!(rc, 700);
    assert_eq!(connector.rest(), 324);

    // A consumer thread drains the buffer while drain waits for it.
    let ring_name = format!("{device}_ringbuffer");
    let consumer = std::thread::spawn(move || {
        let factory = RingBufferFactory::new();
        let mut rb = factory.find_ring_buffer(&ring_name).expect("find ring buffer");
        let mut consumed = 0u32;
        while consumed < 1024 {
            let mut n = 1024 - consumed;
            let offset = rb.begin_access(RingBufferAccess::Read, &mut n).unwrap();
            rb.end_access(RingBufferAccess::Read, offset, n).unwrap();
            consumed += n;
            if n == 0 {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }
        factory.lose_ring_buffer(rb);
        consumed
    });

    assert_eq!(connector.drain(), 0);
    assert_eq!(connector.rest(), 0);
    assert_eq!(consumer.join().unwrap(), 1024);
}

#[test]
fn capture_fd_signal_drives_poll() {
    let device = unique_device("fd", "_c");
    let mut router = MockRouter::create(&device, &default_params(&device));
    router.spawn_responder();

    let mut connector = plugin_connector();
    assert_eq!(
        connector.init(&device[..device.len() - 2], StreamDirection::Capture, false),
        0
    );
    negotiate(&mut connector);
    assert_eq!(connector.set_sw_params(1024), 0);

    // The router produces one period into the capture buffer; crossing
    // avail_min fires the FD signal.
    {
        let rb = router
            .connection
            .ring_buffer_mut()
            .expect("router ring buffer");
        let mut n = 1024;
        let offset = rb.begin_access(RingBufferAccess::Write, &mut n).unwrap();
        assert_eq!(n, 1024);
        rb.end_access(RingBufferAccess::Write, offset, n).unwrap();
    }

    // The plugin's poll fd reports readability...
    let mut pfd = libc::pollfd {
        fd: connector.io_plug().poll_fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let ready = unsafe { libc::poll(&mut pfd, 1, 1000) };
    assert_eq!(ready, 1);
    assert_ne!(pfd.revents & libc::POLLIN, 0);

    // ...which the connector maps to POLLIN for a capture stream...
    let mut revents = 0i16;
    assert_eq!(connector.handle_poll_revents(&[pfd], &mut revents), 0);
    assert_ne!(revents & libc::POLLIN, 0);

    // ...and one period can be consumed.
    let mut frames = vec![0.0f32; 2 * 1024];
    let areas = host_areas(&mut frames, 2, 1024);
    let rc = connector.transfer_job(&areas, 0, 1024, TransferDirection::Capture);
    assert_eq!(rc, 1024);
}

#[test]
fn capture_frame_pointer_follows_router_writes() {
    let device = unique_device("fp", "_c");
    let mut router = MockRouter::create(&device, &default_params(&device));
    router.spawn_responder();

    let mut connector = plugin_connector();
    assert_eq!(
        connector.init(&device[..device.len() - 2], StreamDirection::Capture, false),
        0
    );
    negotiate(&mut connector);

    assert_eq!(connector.frame_pointer(), 0);
    {
        let rb = router.connection.ring_buffer_mut().expect("router ring buffer");
        let mut n = 512;
        let offset = rb.begin_access(RingBufferAccess::Write, &mut n).unwrap();
        rb.end_access(RingBufferAccess::Write, offset, n).unwrap();
    }
    // The pointer callback reports the router's progress, i.e. the write
    // offset of the capture buffer.
    assert_eq!(connector.frame_pointer(), 512);
}

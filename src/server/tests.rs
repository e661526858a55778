//! End-to-end tests over loopback sockets against the simulated camera.

use std::{
    net::TcpStream,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    camera::{CameraError, CameraHandle, SimulatedCamera},
    config::{CameraConfig, ServerConfig},
    protocol::{BinaryDataAttribute, OutMessage, ProtocolTransport, TransportError, Value},
};

use super::App;

const SENSOR_WIDTH: u32 = 8;
const SENSOR_HEIGHT: u32 = 6;

struct Harness {
    app: App,
    camera: Arc<SimulatedCamera>,
}

impl Harness {
    fn start() -> Self {
        let config = ServerConfig {
            address: "127.0.0.1:0".parse().unwrap(),
            queue_capacity: 16,
            acquisition_timeout_ms: 1000,
            broadcast_timeout_ms: 500,
            camera: CameraConfig {
                sensor_width: SENSOR_WIDTH,
                sensor_height: SENSOR_HEIGHT,
                byte_depth: 2,
                frame_period_ms: 1,
            },
        };
        let camera = Arc::new(SimulatedCamera::new(config.camera.simulated()));
        let app = App::start(config, CameraHandle::new(camera.clone())).unwrap();
        Self { app, camera }
    }

    fn connect(&self) -> Client {
        let stream = TcpStream::connect(self.app.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Client {
            transport: ProtocolTransport::new(stream),
        }
    }
}

struct Client {
    transport: ProtocolTransport<TcpStream>,
}

impl Client {
    fn send(&mut self, lines: &str) {
        self.transport.write_raw(lines.as_bytes()).unwrap();
    }

    fn recv(&mut self) -> OutMessage {
        self.transport.read_response().unwrap()
    }

    /// Reads messages up to and including the first one matching `done`.
    fn recv_until(&mut self, done: impl Fn(&OutMessage) -> bool) -> Vec<OutMessage> {
        let mut messages = Vec::new();
        loop {
            let message = self.recv();
            let finished = done(&message);
            messages.push(message);
            if finished {
                return messages;
            }
        }
    }

    fn recv_frame(&mut self) -> (BinaryDataAttribute, Vec<u8>) {
        let header = match self.recv() {
            OutMessage::BinaryDataAttribute(header) => header,
            other => panic!("expected a frame header, got {other:?}"),
        };
        match self.recv() {
            OutMessage::BwImage(pixels) => (header, pixels),
            other => panic!("expected frame pixels, got {other:?}"),
        }
    }

    fn client_id(&mut self) -> Value {
        self.send("clientId?\n");
        match self.recv() {
            OutMessage::Success {
                value: Some(value), ..
            } => value,
            other => panic!("unexpected reply {other:?}"),
        }
    }
}

fn count_frames(messages: &[OutMessage]) -> usize {
    messages
        .iter()
        .filter(|m| matches!(m, OutMessage::BinaryDataAttribute(_)))
        .count()
}

#[test]
fn assignment_then_inquiry_in_order() {
    let harness = Harness::start();
    let mut client = harness.connect();

    client.send("frameRate=10\nframeRate?\n");
    assert_eq!(client.recv(), OutMessage::success("frameRate", 10.0));
    assert_eq!(client.recv(), OutMessage::success("frameRate", 10.0));

    client.send("isl=3\ninputSequenceLength?\n");
    assert_eq!(client.recv(), OutMessage::success("isl", 3));
    assert_eq!(client.recv(), OutMessage::success("inputSequenceLength", 3));
}

#[test]
fn malformed_input_keeps_connection() {
    let harness = Harness::start();
    let mut client = harness.connect();

    client.send("=oops\nframeRate?\n");
    assert!(matches!(
        client.recv(),
        OutMessage::Error { identifier, .. } if identifier == "error"
    ));
    assert_eq!(client.recv(), OutMessage::success("frameRate", 4.0));

    client.transport.write_raw(b"\xff\xfe\n\r\nping\r\n").unwrap();
    assert!(client.recv().is_error());
    assert_eq!(client.recv(), OutMessage::ack("ping"));
}

#[test]
fn validation_errors_name_the_identifier() {
    let harness = Harness::start();
    let mut client = harness.connect();

    client.send("zoom?\nisl=2.5\nfr=0\nclientId=\"me\"\n");
    assert_eq!(
        client.recv(),
        OutMessage::error("zoom", "unknown identifier 'zoom' for inquiry")
    );
    assert_eq!(
        client.recv(),
        OutMessage::error("isl", "'isl' expects integer, got float")
    );
    assert_eq!(
        client.recv(),
        OutMessage::error("fr", "fr must be within [0.001, 1000], got 0.0")
    );
    assert!(client.recv().is_error());

    // Nothing was applied.
    client.send("fr?\n");
    assert_eq!(client.recv(), OutMessage::success("fr", 4.0));
}

#[test]
fn frame_rate_too_slow_is_refused() {
    let harness = Harness::start();
    let mut client = harness.connect();

    client.send("fr=1e-20\ngi\ngi\nfr=10\n");
    let reply = client.recv();
    assert!(reply.is_error(), "unexpected reply {reply:?}");

    for _ in 0..2 {
        client.recv_frame();
        assert_eq!(client.recv(), OutMessage::ack("gi"));
    }
    assert_eq!(client.recv(), OutMessage::success("fr", 10.0));
}

#[test]
fn single_frame() {
    let harness = Harness::start();
    let mut client = harness.connect();
    let id = client.client_id();

    client.send("gi\n");
    let (header, pixels) = client.recv_frame();
    assert_eq!(client.recv(), OutMessage::ack("gi"));

    assert_eq!(
        (header.width, header.height, header.byte_depth),
        (SENSOR_WIDTH, SENSOR_HEIGHT, 2)
    );
    assert_eq!(header.attribute("clientId"), Some(&id));
    assert_eq!(header.attribute("isn"), Some(&Value::Int(0)));
    assert!(matches!(header.attribute("timestamp"), Some(Value::Float(_))));
    assert_eq!(pixels.len(), header.payload_len());

    // Gradient along x, sent big-endian.
    let first = u16::from_be_bytes([pixels[0], pixels[1]]);
    let second = u16::from_be_bytes([pixels[2], pixels[3]]);
    assert_eq!(second, first + 1);
}

#[test]
fn sequence_uses_session_length() {
    let harness = Harness::start();
    let mut client = harness.connect();

    client.send("isl=3\nfr=200\nget-N-frames\n");
    assert_eq!(client.recv(), OutMessage::success("isl", 3));
    assert_eq!(client.recv(), OutMessage::success("fr", 200.0));

    for i in 0..3 {
        let (header, _) = client.recv_frame();
        assert_eq!(header.attribute("isn"), Some(&Value::Int(i)));
    }
    assert_eq!(client.recv(), OutMessage::ack("get-N-frames"));

    // The count argument overrides the session length.
    client.send("gis(2)\n");
    let messages = client.recv_until(|m| *m == OutMessage::ack("gis"));
    assert_eq!(count_frames(&messages), 2);
}

#[test]
fn second_stream_rejected() {
    let harness = Harness::start();
    let mut client = harness.connect();

    client.send("fr=2\ngis(5)\ngis(5)\n");
    assert_eq!(client.recv(), OutMessage::success("fr", 2.0));

    let messages = client.recv_until(OutMessage::is_error);
    assert_eq!(
        messages.last(),
        Some(&OutMessage::error("gis", "a streaming command is already active"))
    );
    assert!(count_frames(&messages) <= 1);

    client.send("fr=3\nisl?\n");
    let messages = client.recv_until(|m| {
        matches!(m, OutMessage::Success { identifier, .. } if identifier == "isl")
    });
    assert!(messages.contains(&OutMessage::error(
        "fr",
        "fr cannot change while streaming"
    )));

    client.send("abort\n");
    client.recv_until(|m| *m == OutMessage::ack("abort"));
}

#[test]
fn abort_stops_stream() {
    let harness = Harness::start();
    let mut client = harness.connect();

    client.send("isl=100\nfr=50\ngis\n");
    client.recv();
    client.recv();
    client.recv_frame();
    client.recv_frame();

    let aborted = Instant::now();
    client.send("abort\n");
    let messages = client.recv_until(|m| *m == OutMessage::ack("abort"));
    assert!(aborted.elapsed() < Duration::from_secs(1));

    // Frames queued before the abort arrive whole, and nothing else does.
    let (before, ack) = messages.split_at(messages.len() - 1);
    assert_eq!(ack, &[OutMessage::ack("abort")]);
    for pair in before.chunks(2) {
        assert!(matches!(pair[0], OutMessage::BinaryDataAttribute(_)));
        assert!(matches!(pair[1], OutMessage::BwImage(_)));
    }

    // No more frames and no completion after the acknowledgment.
    client.send("ping\n");
    assert_eq!(client.recv(), OutMessage::ack("ping"));

    // The session can stream again.
    client.send("gi\n");
    client.recv_frame();
    assert_eq!(client.recv(), OutMessage::ack("gi"));
}

#[test]
fn abort_without_stream_is_acknowledged() {
    let harness = Harness::start();
    let mut client = harness.connect();

    client.send("abort\n");
    assert_eq!(client.recv(), OutMessage::ack("abort"));
}

#[test]
fn concurrent_sessions_are_isolated() {
    let harness = Harness::start();
    let mut first = harness.connect();
    let mut second = harness.connect();
    let first_id = first.client_id();
    let second_id = second.client_id();
    assert_ne!(first_id, second_id);

    first.send("gi\n");
    second.send("gi\n");

    for (client, id) in [(&mut first, &first_id), (&mut second, &second_id)] {
        let (header, _) = client.recv_frame();
        assert_eq!(header.attribute("clientId"), Some(id));
        assert_eq!(client.recv(), OutMessage::ack("gi"));
    }

    // Neither got anything else.
    first.send("ping\n");
    second.send("ping\n");
    assert_eq!(first.recv(), OutMessage::ack("ping"));
    assert_eq!(second.recv(), OutMessage::ack("ping"));
}

#[test]
fn integration_time_is_broadcast() {
    let harness = Harness::start();
    let mut sender = harness.connect();
    let mut other = harness.connect();
    // Make sure both sessions are registered.
    sender.client_id();
    other.client_id();

    sender.send("it=2.5\n");
    assert_eq!(sender.recv(), OutMessage::success("integrationTime", 2.5));
    assert_eq!(other.recv(), OutMessage::success("integrationTime", 2.5));

    other.send("integrationTime?\n");
    assert_eq!(other.recv(), OutMessage::success("integrationTime", 2.5));

    sender.send("it=20000\n");
    assert!(sender.recv().is_error());
}

#[test]
fn region_of_interest() {
    let harness = Harness::start();
    let mut client = harness.connect();

    client.send("imageWidth=9\nimg_l=4\nimg_w=4\nimg_l=4\nimg_w=5\nimg_h=0\n");
    assert!(client.recv().is_error());
    assert!(client.recv().is_error());
    assert_eq!(client.recv(), OutMessage::success("img_w", 4));
    assert_eq!(client.recv(), OutMessage::success("img_l", 4));
    assert!(client.recv().is_error());
    assert!(client.recv().is_error());

    client.send("imageLeft?\ngi\n");
    assert_eq!(client.recv(), OutMessage::success("imageLeft", 4));
    let (header, pixels) = client.recv_frame();
    assert_eq!((header.width, header.height), (4, SENSOR_HEIGHT));
    assert_eq!(pixels.len(), 4 * SENSOR_HEIGHT as usize * 2);
    assert_eq!(client.recv(), OutMessage::ack("gi"));
}

#[test]
fn region_locked_while_acquiring() {
    let harness = Harness::start();
    let mut streaming = harness.connect();
    let mut other = harness.connect();

    streaming.send("fr=1\ngis(3)\n");
    streaming.recv();
    streaming.recv_frame();

    other.send("img_w=2\n");
    assert_eq!(
        other.recv(),
        OutMessage::error(
            "img_w",
            "feature 'Width' cannot change while acquisition is running"
        )
    );

    streaming.send("abort\n");
    streaming.recv_until(|m| *m == OutMessage::ack("abort"));
    other.send("img_w=2\n");
    assert_eq!(other.recv(), OutMessage::success("img_w", 2));
}

#[test]
fn concurrent_region_updates_stay_on_sensor() {
    let harness = Harness::start();

    // Left 4 with width 8 would overhang; each writer alone is always valid.
    let writers: Vec<_> = [("img_l", [0, 4]), ("img_w", [8, 4])]
        .into_iter()
        .map(|(identifier, values)| {
            let mut client = harness.connect();
            std::thread::spawn(move || {
                for round in 0..200 {
                    client.send(&format!("{identifier}={}\n", values[round % 2]));
                    client.recv();
                }
            })
        })
        .collect();

    let mut observer = harness.connect();
    for _ in 0..20 {
        observer.send("gi\n");
        let messages = observer.recv_until(|m| m.is_error() || *m == OutMessage::ack("gi"));
        assert_eq!(messages.last(), Some(&OutMessage::ack("gi")));
    }
    for writer in writers {
        writer.join().unwrap();
    }

    observer.send("img_l?\nimg_w?\n");
    let read = |message: OutMessage| match message {
        OutMessage::Success {
            value: Some(Value::Int(v)),
            ..
        } => v,
        other => panic!("unexpected reply {other:?}"),
    };
    let left = read(observer.recv());
    let width = read(observer.recv());
    assert!(left + width <= i64::from(SENSOR_WIDTH), "{left} + {width}");
}

#[test]
fn camera_failure_ends_only_the_stream() {
    let harness = Harness::start();
    let mut client = harness.connect();
    harness
        .camera
        .inject_fault(CameraError::Acquisition("boom".to_string()));

    client.send("gi\n");
    assert_eq!(
        client.recv(),
        OutMessage::error("gi", "frame acquisition failed: boom")
    );

    client.send("ping\ngi\n");
    assert_eq!(client.recv(), OutMessage::ack("ping"));
    client.recv_frame();
    assert_eq!(client.recv(), OutMessage::ack("gi"));
}

#[test]
fn disconnect_unregisters_session() {
    let harness = Harness::start();
    let mut client = harness.connect();
    let Value::Text(id) = client.client_id() else {
        panic!("client id is not text");
    };
    assert_eq!(harness.app.state().session_count(), 1);
    let session = harness.app.state().sessions().remove(0);
    assert_eq!(session.id().to_string(), id);
    assert!(harness.app.state().lookup(session.id()).is_some());
    drop(session);

    client.send("fr=1\ngis(10)\n");
    drop(client);

    let deadline = Instant::now() + Duration::from_secs(5);
    while harness.app.state().session_count() > 0 {
        assert!(Instant::now() < deadline, "session was never torn down");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!harness.app.state().camera().is_acquiring());
}

#[test]
fn shutdown_closes_sessions() {
    let mut harness = Harness::start();
    let mut client = harness.connect();
    client.client_id();

    harness.app.shutdown();
    assert!(matches!(
        client.transport.read_response(),
        Err(TransportError::Closed)
    ));
    assert_eq!(harness.app.state().session_count(), 0);

    // Idempotent.
    harness.app.shutdown();
}

// Transport tests against loopback fakes
// Focus: wire shell round trips, bridge correlation, reconnect and drop semantics

use super::codec::{self, A_AUTH, A_CLSE, A_CNXN, A_OKAY, A_OPEN, A_VERSION, A_WRTE, AdbFrame, MAX_PAYLOAD};
use super::types::Device;
use crate::config::{BridgeEndpoint, Timeouts};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

// 1x1 RGBA PNG
pub(crate) const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

pub(crate) fn fast_timeouts() -> Timeouts {
    Timeouts {
        screenshot: Duration::from_millis(300),
        wake_on_lan: Duration::from_millis(300),
        reconnect_delay: Duration::from_millis(100),
        wire_read: Duration::from_millis(200),
        connect: Duration::from_secs(2),
        relay_connect: Duration::from_secs(2),
        scan: Duration::from_secs(1),
        apps: Duration::from_secs(1),
    }
}

// Poll `check` until it holds or two seconds pass
pub(crate) async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

// ============================================================
// FAKE ADB DAEMON
// ============================================================

pub(crate) enum Reply {
    /// One WRTE frame carrying the output.
    Output(String),
    /// Never answer.
    Silent,
    /// Close the socket without answering.
    Hangup,
    /// OKAY, then one WRTE per chunk (each acknowledged), then CLSE.
    Chunks(Vec<Vec<u8>>),
}

type Responder = Arc<dyn Fn(&str) -> Reply + Send + Sync>;

pub(crate) struct FakeAdbd {
    pub addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl FakeAdbd {
    pub async fn start(auth: bool, respond: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let respond: Responder = Arc::new(respond);

        let recorded = commands.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_adb(stream, auth, respond.clone(), recorded.clone()));
            }
        });
        Self { addr, commands, task }
    }

    /// Answers every shell command with empty output.
    pub async fn quiet() -> Self {
        Self::start(false, |_| Reply::Output(String::new())).await
    }

    pub fn device(&self) -> Device {
        Device::new("127.0.0.1", self.addr.port(), Some("Fake TV"))
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl Drop for FakeAdbd {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_adb(mut stream: TcpStream, auth: bool, respond: Responder, commands: Arc<Mutex<Vec<String>>>) {
    let Ok(Ok(hello)) = codec::read_frame(&mut stream).await else {
        return;
    };
    assert_eq!(hello.command, A_CNXN, "host must open with CNXN");
    let reply = if auth {
        AdbFrame::new(A_AUTH, 1, 0, vec![0u8; 20])
    } else {
        AdbFrame::new(A_CNXN, A_VERSION, MAX_PAYLOAD, b"device::ro.product.model=FakeTV;\0".to_vec())
    };
    if codec::write_frame(&mut stream, &reply).await.is_err() {
        return;
    }

    let mut remote_id = 100;
    loop {
        let frame = match codec::read_frame(&mut stream).await {
            Ok(Ok(frame)) => frame,
            _ => return,
        };
        if frame.command != A_OPEN {
            continue;
        }
        let service = frame.payload_text();
        let command = service.strip_prefix("shell:").unwrap_or(&service).to_string();
        commands.lock().unwrap().push(command.clone());
        remote_id += 1;
        let local_id = frame.arg0;

        match respond(&command) {
            Reply::Output(text) => {
                let wrte = AdbFrame::new(A_WRTE, remote_id, local_id, text.into_bytes());
                if codec::write_frame(&mut stream, &wrte).await.is_err() {
                    return;
                }
            }
            Reply::Silent => {}
            Reply::Hangup => return,
            Reply::Chunks(chunks) => {
                let _ = codec::write_frame(&mut stream, &AdbFrame::okay(remote_id, local_id)).await;
                for chunk in chunks {
                    let _ = codec::write_frame(&mut stream, &AdbFrame::new(A_WRTE, remote_id, local_id, chunk)).await;
                    match codec::read_frame(&mut stream).await {
                        Ok(Ok(ack)) => assert_eq!(ack.command, A_OKAY, "each WRTE must be acknowledged"),
                        _ => return,
                    }
                }
                let _ = codec::write_frame(&mut stream, &AdbFrame::new(A_CLSE, remote_id, local_id, Vec::new())).await;
                match codec::read_frame(&mut stream).await {
                    Ok(Ok(close)) => assert_eq!(close.command, A_CLSE),
                    _ => return,
                }
            }
        }
    }
}

// ============================================================
// FAKE RELAY
// ============================================================

pub(crate) enum RelayReply {
    Send(String),
    Later(Duration, String),
    Close,
}

/// Script input: the received message and how many earlier messages of the
/// same `type` the relay has seen, across all connections.
type RelayScript = Arc<dyn Fn(&Value, usize) -> Vec<RelayReply> + Send + Sync>;

pub(crate) struct FakeRelay {
    pub endpoint: BridgeEndpoint,
    received: Arc<Mutex<Vec<Value>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeRelay {
    pub async fn start(script: impl Fn(&Value, usize) -> Vec<RelayReply> + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = BridgeEndpoint::new("127.0.0.1", listener.local_addr().unwrap().port());
        let received = Arc::new(Mutex::new(Vec::new()));
        let script: RelayScript = Arc::new(script);

        let connections = Arc::new(AtomicUsize::new(0));

        let recorded = received.clone();
        let accepted = connections.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_relay(stream, script.clone(), recorded.clone()));
            }
        });
        Self {
            endpoint,
            received,
            connections,
            task,
        }
    }

    /// TCP connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v["type"] == kind)
            .count()
    }
}

impl Drop for FakeRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_relay(stream: TcpStream, script: RelayScript, received: Arc<Mutex<Vec<Value>>>) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Option<String>>();
    let writer = tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            match item {
                Some(text) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    while let Some(Ok(message)) = read.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let value: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        let seen = {
            let mut all = received.lock().unwrap();
            let seen = all.iter().filter(|v| v["type"] == value["type"]).count();
            all.push(value.clone());
            seen
        };
        for reply in script(&value, seen) {
            match reply {
                RelayReply::Send(text) => {
                    let _ = tx.send(Some(text));
                }
                RelayReply::Later(delay, text) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(Some(text));
                    });
                }
                RelayReply::Close => {
                    let _ = tx.send(None);
                }
            }
        }
    }
    writer.abort();
}

/// Echo `connect{device}` back as `connected{device}`.
pub(crate) fn accept_connect(message: &Value) -> Option<RelayReply> {
    (message["type"] == "connect").then(|| {
        RelayReply::Send(json!({"type": "connected", "device": message["device"]}).to_string())
    })
}

#[cfg(test)]
mod wire_transport_tests {
    use super::*;
    use crate::adb::error::RemoteError;
    use crate::adb::types::ConnectionState;
    use crate::adb::wire::WireTransport;

    #[tokio::test]
    async fn test_home_key_becomes_keyevent_3() {
        let adbd = FakeAdbd::quiet().await;
        let wire = WireTransport::connect(adbd.device(), fast_timeouts()).await.unwrap();
        assert!(wire.handshake().is_established());

        wire.send_key("KEYCODE_HOME").await.unwrap();
        assert_eq!(adbd.commands(), vec!["input keyevent 3"]);
    }

    #[tokio::test]
    async fn test_keys_arrive_in_issue_order() {
        let adbd = FakeAdbd::quiet().await;
        let wire = WireTransport::connect(adbd.device(), fast_timeouts()).await.unwrap();

        wire.send_key("KEYCODE_DPAD_UP").await.unwrap();
        wire.send_key("KEYCODE_ENTER").await.unwrap();
        assert_eq!(adbd.commands(), vec!["input keyevent 19", "input keyevent 66"]);
    }

    #[tokio::test]
    async fn test_text_is_escaped() {
        let adbd = FakeAdbd::quiet().await;
        let wire = WireTransport::connect(adbd.device(), fast_timeouts()).await.unwrap();

        wire.send_text("hello world").await.unwrap();
        assert_eq!(adbd.commands(), vec![r#"input text "hello%sworld""#]);
    }

    #[tokio::test]
    async fn test_pointer_commands() {
        let adbd = FakeAdbd::quiet().await;
        let wire = WireTransport::connect(adbd.device(), fast_timeouts()).await.unwrap();

        wire.move_cursor(10, -20).await.unwrap();
        wire.tap_center().await.unwrap();
        wire.scroll(120).await.unwrap();
        wire.scroll(-5).await.unwrap();
        wire.launch_app("com.plexapp.android").await.unwrap();
        wire.power_off().await.unwrap();
        assert_eq!(
            adbd.commands(),
            vec![
                "input swipe 500 500 510 480 50",
                "input tap 540 960",
                "input swipe 540 960 540 760 100",
                "input swipe 540 960 540 1160 100",
                "monkey -p com.plexapp.android -c android.intent.category.LAUNCHER 1",
                "input keyevent 26",
            ]
        );
    }

    #[tokio::test]
    async fn test_shell_returns_single_frame_output() {
        let adbd = FakeAdbd::start(false, |cmd| match cmd {
            "pm list packages -3" => {
                Reply::Output("package:com.netflix.ninja\npackage:com.plexapp.android\n".into())
            }
            _ => Reply::Output(String::new()),
        })
        .await;
        let wire = WireTransport::connect(adbd.device(), fast_timeouts()).await.unwrap();

        let apps = wire.get_apps().await.unwrap();
        let labels: Vec<_> = apps.iter().map(|a| a.label.as_str()).collect();
        assert_eq!(labels, ["Ninja", "Android"]);
        assert_eq!(apps[1].package_name, "com.plexapp.android");
    }

    #[tokio::test]
    async fn test_read_timeout_yields_empty_output_and_keeps_connection() {
        let adbd = FakeAdbd::start(false, |cmd| {
            if cmd.starts_with("sleep") {
                Reply::Silent
            } else {
                Reply::Output("ok".into())
            }
        })
        .await;
        let wire = WireTransport::connect(adbd.device(), fast_timeouts()).await.unwrap();

        assert_eq!(wire.shell("sleep 10").await.unwrap(), "");
        assert!(wire.state().await.is_connected());
        assert_eq!(wire.shell("echo").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_screenshot_collects_stream_until_close() {
        let adbd = FakeAdbd::start(false, |cmd| {
            if cmd == "exec:screencap -p" {
                let (head, tail) = TINY_PNG.split_at(20);
                Reply::Chunks(vec![head.to_vec(), tail.to_vec()])
            } else {
                Reply::Output(String::new())
            }
        })
        .await;
        let wire = WireTransport::connect(adbd.device(), fast_timeouts()).await.unwrap();

        let capture = wire.take_screenshot().await.unwrap().expect("capture");
        assert_eq!(capture.bytes, TINY_PNG);
        assert_eq!(capture.format.as_deref(), Some("png"));
        assert_eq!((capture.width, capture.height), (Some(1), Some(1)));
    }

    #[tokio::test]
    async fn test_hangup_marks_transport_failed() {
        let adbd = FakeAdbd::start(false, |_| Reply::Hangup).await;
        let wire = WireTransport::connect(adbd.device(), fast_timeouts()).await.unwrap();

        let err = wire.send_key("KEYCODE_HOME").await.unwrap_err();
        assert!(err.is_connection_lost(), "unexpected error {err:?}");
        assert!(matches!(wire.state().await, ConnectionState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_screenshot_hangup_marks_transport_failed() {
        let adbd = FakeAdbd::start(false, |cmd| {
            if cmd == "exec:screencap -p" {
                Reply::Hangup
            } else {
                Reply::Output(String::new())
            }
        })
        .await;
        let wire = WireTransport::connect(adbd.device(), fast_timeouts()).await.unwrap();

        let err = wire.take_screenshot().await.unwrap_err();
        assert!(err.is_connection_lost(), "unexpected error {err:?}");
        assert!(matches!(wire.state().await, ConnectionState::Failed { .. }));
        assert!(wire.take_screenshot().await.is_err());
        assert!(matches!(wire.state().await, ConnectionState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_cursor_offset_saturates() {
        let adbd = FakeAdbd::quiet().await;
        let wire = WireTransport::connect(adbd.device(), fast_timeouts()).await.unwrap();

        wire.move_cursor(i32::MAX, 0).await.unwrap();
        wire.move_cursor(i32::MIN, i32::MIN).await.unwrap();
        assert_eq!(
            adbd.commands(),
            vec![
                format!("input swipe 500 500 {} 500 50", i32::MAX),
                format!("input swipe 500 500 {} {} 50", i32::MIN + 500, i32::MIN + 500),
            ]
        );
    }

    #[tokio::test]
    async fn test_shell_syntax_in_key_or_package_rejected() {
        let adbd = FakeAdbd::quiet().await;
        let wire = WireTransport::connect(adbd.device(), fast_timeouts()).await.unwrap();

        let err = wire.send_key("3; reboot").await.unwrap_err();
        assert!(matches!(err, RemoteError::InvalidArgument { what: "key code", .. }), "{err:?}");
        let err = wire.launch_app("com.x; rm -rf /sdcard").await.unwrap_err();
        assert!(matches!(err, RemoteError::InvalidArgument { what: "package name", .. }), "{err:?}");

        assert!(adbd.commands().is_empty());
        assert!(wire.state().await.is_connected());
    }

    #[tokio::test]
    async fn test_auth_challenge_still_completes_handshake() {
        let adbd = FakeAdbd::start(true, |_| Reply::Output(String::new())).await;
        let wire = WireTransport::connect(adbd.device(), fast_timeouts()).await.unwrap();
        assert!(matches!(
            wire.handshake(),
            codec::HandshakeState::Established { auth_requested: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_failure() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let device = Device::new("127.0.0.1", port, None);
        let err = WireTransport::connect(device, fast_timeouts()).await.err().unwrap();
        assert!(matches!(err, RemoteError::ConnectFailure { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_disconnect_closes_socket() {
        let adbd = FakeAdbd::quiet().await;
        let wire = WireTransport::connect(adbd.device(), fast_timeouts()).await.unwrap();
        wire.disconnect().await;
        assert_eq!(wire.state().await, ConnectionState::Disconnected);
        assert!(matches!(
            wire.send_key("KEYCODE_HOME").await,
            Err(RemoteError::TransportUnavailable { .. })
        ));
    }
}

#[cfg(test)]
mod bridge_transport_tests {
    use super::*;
    use crate::adb::bridge::BridgeTransport;
    use crate::adb::error::RemoteError;
    use crate::adb::types::ConnectionState;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    fn screenshot_reply() -> String {
        json!({"type": "screenshot", "success": true, "data": STANDARD.encode(TINY_PNG)}).to_string()
    }

    async fn connected(relay: &FakeRelay) -> BridgeTransport {
        let device = Device::new("192.168.1.50", 5555, Some("Living Room"));
        BridgeTransport::connect(device, &relay.endpoint, fast_timeouts())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_and_send_key() {
        let relay = FakeRelay::start(|msg, _| accept_connect(msg).into_iter().collect()).await;
        let bridge = connected(&relay).await;
        assert!(bridge.state().await.is_connected());
        assert_eq!(bridge.device().id, "192.168.1.50:5555");

        bridge.send_key("KEYCODE_HOME").await.unwrap();
        bridge.move_cursor(3, -4).await.unwrap();
        eventually("key and cursor", || relay.received().len() == 3).await;

        let received = relay.received();
        assert_eq!(received[0]["device"]["ip"], "192.168.1.50");
        assert_eq!(received[1], json!({"type": "key", "keyCode": "KEYCODE_HOME"}));
        assert_eq!(received[2], json!({"type": "cursor", "x": 3, "y": -4}));
    }

    // Accepts TCP and never answers the WebSocket upgrade
    async fn silent_listener() -> (BridgeEndpoint, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = BridgeEndpoint::new("127.0.0.1", listener.local_addr().unwrap().port());
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        (endpoint, task)
    }

    #[tokio::test]
    async fn test_stalled_upgrade_fails_connect_and_scan() {
        let (endpoint, listener) = silent_listener().await;
        let timeouts = Timeouts {
            connect: Duration::from_millis(300),
            ..fast_timeouts()
        };

        let device = Device::new("192.168.1.50", 5555, None);
        let result = tokio::time::timeout(
            Duration::from_secs(3),
            BridgeTransport::connect(device, &endpoint, timeouts.clone()),
        )
        .await
        .expect("connect should give up");
        assert!(matches!(result, Err(RemoteError::ConnectFailure { .. })));

        let scan = tokio::time::timeout(Duration::from_secs(3), BridgeTransport::scan(&endpoint, &timeouts))
            .await
            .expect("scan should give up");
        assert!(scan.is_err());
        listener.abort();
    }

    #[tokio::test]
    async fn test_reconnect_ignored_while_open() {
        let relay = FakeRelay::start(|msg, _| accept_connect(msg).into_iter().collect()).await;
        let bridge = connected(&relay).await;

        for _ in 0..3 {
            bridge.reconnect();
        }
        bridge.send_key("KEYCODE_HOME").await.unwrap();
        eventually("key", || relay.count("key") == 1).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(bridge.is_open());
        assert_eq!(relay.connections(), 1);
        assert_eq!(relay.count("connect"), 1);
    }

    #[tokio::test]
    async fn test_reconnect_skips_delay_after_close() {
        let relay = FakeRelay::start(|msg, _| {
            if msg["type"] == "tap" {
                return vec![RelayReply::Close];
            }
            accept_connect(msg).into_iter().collect()
        })
        .await;
        let timeouts = Timeouts {
            reconnect_delay: Duration::from_secs(30),
            ..fast_timeouts()
        };
        let device = Device::new("192.168.1.50", 5555, None);
        let bridge = BridgeTransport::connect(device, &relay.endpoint, timeouts).await.unwrap();

        bridge.tap().await.unwrap();
        eventually("channel closed", || !bridge.is_open()).await;
        bridge.reconnect();
        eventually("channel reopened", || bridge.is_open()).await;
        assert_eq!(relay.connections(), 2);
    }

    #[tokio::test]
    async fn test_relay_error_fails_connect() {
        let relay = FakeRelay::start(|_, _| {
            vec![RelayReply::Send(
                json!({"type": "error", "message": "Failed to connect to device"}).to_string(),
            )]
        })
        .await;
        let device = Device::new("192.168.1.51", 5555, None);
        let err = BridgeTransport::connect(device, &relay.endpoint, fast_timeouts())
            .await
            .err()
            .unwrap();
        match err {
            RemoteError::ConnectFailure { device_id, reason } => {
                assert_eq!(device_id, "192.168.1.51:5555");
                assert!(reason.contains("Failed to connect to device"), "{reason}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_connect_failure() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut timeouts = fast_timeouts();
        timeouts.connect = Duration::from_millis(300);
        let device = Device::new("192.168.1.52", 5555, None);
        let err = BridgeTransport::connect(device, &BridgeEndpoint::new("127.0.0.1", port), timeouts)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RemoteError::ConnectFailure { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_messages_are_ignored() {
        let relay = FakeRelay::start(|msg, _| {
            let mut replies = vec![
                RelayReply::Send("this is not json".into()),
                RelayReply::Send(json!({"type": "battery", "level": 80}).to_string()),
            ];
            replies.extend(accept_connect(msg));
            replies
        })
        .await;
        let bridge = connected(&relay).await;
        assert!(bridge.is_open());
    }

    #[tokio::test]
    async fn test_screenshot_round_trip() {
        let relay = FakeRelay::start(|msg, _| match msg["type"].as_str() {
            Some("screenshot") => vec![RelayReply::Send(screenshot_reply())],
            _ => accept_connect(msg).into_iter().collect(),
        })
        .await;
        let bridge = connected(&relay).await;

        let capture = bridge.take_screenshot().await.unwrap().expect("capture");
        assert_eq!(capture.bytes, TINY_PNG);
        assert_eq!(capture.format.as_deref(), Some("png"));
    }

    #[tokio::test]
    async fn test_screenshot_timeout_once_then_stale_response_tolerated() {
        let relay = FakeRelay::start(|msg, seen| match (msg["type"].as_str(), seen) {
            (Some("screenshot"), 0) => vec![RelayReply::Later(Duration::from_millis(600), screenshot_reply())],
            (Some("screenshot"), _) => vec![RelayReply::Send(screenshot_reply())],
            _ => accept_connect(msg).into_iter().collect(),
        })
        .await;
        let bridge = connected(&relay).await;

        assert!(bridge.take_screenshot().await.unwrap().is_none());
        // Let the late reply arrive with nobody waiting
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(bridge.is_open());

        let capture = bridge.take_screenshot().await.unwrap();
        assert!(capture.is_some());
        assert_eq!(relay.count("screenshot"), 2);
    }

    #[tokio::test]
    async fn test_second_screenshot_rejected_while_in_flight() {
        let relay = FakeRelay::start(|msg, _| match msg["type"].as_str() {
            Some("screenshot") => vec![RelayReply::Later(Duration::from_millis(100), screenshot_reply())],
            _ => accept_connect(msg).into_iter().collect(),
        })
        .await;
        let bridge = connected(&relay).await;

        let (first, second) = tokio::join!(bridge.take_screenshot(), bridge.take_screenshot());
        assert!(first.unwrap().is_some());
        assert!(matches!(
            second,
            Err(RemoteError::OperationInFlight { operation: "screenshot" })
        ));
    }

    #[tokio::test]
    async fn test_relay_error_fails_pending_screenshot() {
        let relay = FakeRelay::start(|msg, _| match msg["type"].as_str() {
            Some("screenshot") => vec![RelayReply::Send(
                json!({"type": "error", "message": "No device connected"}).to_string(),
            )],
            _ => accept_connect(msg).into_iter().collect(),
        })
        .await;
        let bridge = connected(&relay).await;

        let started = std::time::Instant::now();
        assert!(bridge.take_screenshot().await.unwrap().is_none());
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(bridge.last_error().as_deref(), Some("No device connected"));
    }

    #[tokio::test]
    async fn test_wake_on_lan_through_relay() {
        let relay = FakeRelay::start(|msg, _| match msg["type"].as_str() {
            Some("wake_on_lan") => vec![RelayReply::Send(json!({"type": "wol_sent", "success": true}).to_string())],
            _ => accept_connect(msg).into_iter().collect(),
        })
        .await;
        let bridge = connected(&relay).await;

        let mac = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert!(bridge.wake_on_lan(&mac).await.unwrap());
        let sent = relay.received().into_iter().find(|v| v["type"] == "wake_on_lan").unwrap();
        assert_eq!(sent["macAddress"], "AA:BB:CC:DD:EE:FF");
    }

    #[tokio::test]
    async fn test_wake_on_lan_timeout_is_false() {
        let relay = FakeRelay::start(|msg, _| accept_connect(msg).into_iter().collect()).await;
        let bridge = connected(&relay).await;
        let mac = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert!(!bridge.wake_on_lan(&mac).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_apps_waits_for_apps_message() {
        let relay = FakeRelay::start(|msg, _| match msg["type"].as_str() {
            Some("get_apps") => vec![
                RelayReply::Send(json!({"type": "key_sent", "success": true}).to_string()),
                RelayReply::Send(
                    json!({"type": "apps", "apps": [
                        {"packageName": "com.netflix.ninja", "label": "Ninja", "isSystem": false}
                    ]})
                    .to_string(),
                ),
            ],
            _ => accept_connect(msg).into_iter().collect(),
        })
        .await;
        let bridge = connected(&relay).await;

        let apps = bridge.get_apps().await.unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].package_name, "com.netflix.ninja");
    }

    #[tokio::test]
    async fn test_scan_uses_short_lived_channel() {
        let relay = FakeRelay::start(|msg, _| match msg["type"].as_str() {
            Some("scan") => vec![RelayReply::Send(
                json!({"type": "scan_result", "devices": [{
                    "id": "10.0.0.5:5555", "name": "SHIELD", "ip": "10.0.0.5", "port": 5555,
                    "model": "SHIELD Android TV", "manufacturer": "NVIDIA", "android_version": ""
                }]})
                .to_string(),
            )],
            _ => Vec::new(),
        })
        .await;

        let devices = BridgeTransport::scan(&relay.endpoint, &fast_timeouts()).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].model.as_deref(), Some("SHIELD Android TV"));
        assert_eq!(devices[0].android_version, None);
    }

    #[tokio::test]
    async fn test_command_dropped_while_channel_closed() {
        let relay = FakeRelay::start(|msg, _| match msg["type"].as_str() {
            Some("key") => vec![RelayReply::Close],
            _ => accept_connect(msg).into_iter().collect(),
        })
        .await;
        let device = Device::new("192.168.1.53", 5555, None);
        let mut timeouts = fast_timeouts();
        timeouts.reconnect_delay = Duration::from_secs(30);
        let bridge = BridgeTransport::connect(device, &relay.endpoint, timeouts).await.unwrap();

        bridge.send_key("KEYCODE_HOME").await.unwrap();
        eventually("channel to close", || !bridge.is_open()).await;

        let err = bridge.send_text("lost").await.unwrap_err();
        assert!(matches!(err, RemoteError::TransportUnavailable { .. }), "{err:?}");
        assert!(bridge.last_error().is_some());
        for _ in 0..100 {
            if matches!(bridge.state().await, ConnectionState::Failed { .. }) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(bridge.state().await, ConnectionState::Failed { .. }));
        assert_eq!(relay.count("text"), 0);
    }

    #[tokio::test]
    async fn test_reconnects_and_reattaches_device() {
        let relay = FakeRelay::start(|msg, seen| match (msg["type"].as_str(), seen) {
            (Some("key"), 0) => vec![RelayReply::Close],
            _ => accept_connect(msg).into_iter().collect(),
        })
        .await;
        let bridge = connected(&relay).await;

        bridge.send_key("KEYCODE_HOME").await.unwrap();
        eventually("device re-attached", || relay.count("connect") == 2).await;
        eventually("channel reopened", || bridge.is_open()).await;
        for _ in 0..100 {
            if bridge.state().await.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(bridge.state().await.is_connected());

        bridge.send_key("KEYCODE_BACK").await.unwrap();
        eventually("second key", || relay.count("key") == 2).await;
    }

    #[tokio::test]
    async fn test_disconnect_notifies_relay_and_stops() {
        let relay = FakeRelay::start(|msg, _| match msg["type"].as_str() {
            Some("disconnect") => vec![RelayReply::Send(json!({"type": "disconnected"}).to_string())],
            _ => accept_connect(msg).into_iter().collect(),
        })
        .await;
        let bridge = connected(&relay).await;

        bridge.disconnect().await;
        eventually("disconnect delivered", || relay.count("disconnect") == 1).await;
        assert_eq!(bridge.state().await, ConnectionState::Disconnected);
        assert!(!bridge.is_open());
        assert!(matches!(
            bridge.power_off().await,
            Err(RemoteError::TransportUnavailable { .. })
        ));
    }
}

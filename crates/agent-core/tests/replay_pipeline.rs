//! End-to-end pipeline check: replayed trace in, NDJSON frames out on the
//! management socket, verdict replies back in.

use std::io::{BufRead, BufReader, Write};
use std::time::{Duration, Instant};

use interprocess::local_socket::{prelude::*, GenericFilePath, Stream, ToFsName};

use agent_core::runtime::{LogReloadHandle, SensorRuntime};
use agent_core::SensorConfig;
use mgmt_channel::SensorMessage;
use sensor_core::{EventType, SensorEvent};

fn test_log_handle() -> LogReloadHandle {
    let (_, handle) = tracing_subscriber::reload::Layer::new(
        tracing_subscriber::EnvFilter::new("info"),
    );
    handle
}

fn wait_until(mut ready: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !ready() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn record(event_type: EventType, pid: u32, authorize: bool) -> serde_json::Value {
    let mut event = SensorEvent::new(event_type);
    event.pid = pid;
    event.exec_path = "/usr/bin/true".to_string();
    let mut value = serde_json::json!({
        "event": event,
        "uid": 501,
        "authorize": authorize,
    });
    if authorize {
        // No identity: the exec is unclassified and goes to the manager.
        value["exec_identity"] = serde_json::Value::Null;
    }
    value
}

#[test]
fn replayed_events_flow_to_the_manager_and_back() {
    let dir = tempfile::tempdir().expect("tempdir");

    // One auth exec, one file notify, one captured DNS message.
    let mut dns = record(EventType::NetAccess, 41, false);
    let mut payload = vec![
        0x12u8, 0x34, 0x81, 0x80, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    payload.extend_from_slice(b"\x05cairn\x04test\x00");
    payload.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
    dns["dns_payload"] = serde_json::json!(payload);

    let trace_path = dir.path().join("trace.ndjson");
    let trace = [
        record(EventType::ProcessCreate, 40, true),
        record(EventType::FileCreate, 40, false),
        dns,
    ]
    .iter()
    .map(|value| value.to_string())
    .collect::<Vec<_>>()
    .join("\n");
    std::fs::write(&trace_path, trace).expect("write trace");

    let config = SensorConfig {
        socket_path: dir.path().join("mgmt.sock"),
        auth_timeout_ms: 60_000,
        replay_path: Some(trace_path),
        ..SensorConfig::default()
    };

    let mut runtime = SensorRuntime::start(&config, test_log_handle()).expect("runtime starts");

    // Attach the manager before capture so nothing is dropped fail-open.
    let name = config
        .socket_path
        .as_path()
        .to_fs_name::<GenericFilePath>()
        .expect("socket name");
    let manager = Stream::connect(name).expect("manager connects");
    let mut reader = BufReader::new(manager);
    // connect() returns before the accept thread installs the connection;
    // capture must not start until the channel reports it attached, or the
    // replayed exec is allowed fail-open and no auth frame ever arrives.
    wait_until(|| runtime.manager_connected());

    runtime.begin_capture().expect("capture starts");

    let mut read_frame = || {
        let mut line = String::new();
        reader.read_line(&mut line).expect("frame line");
        serde_json::from_str::<SensorMessage>(line.trim()).expect("decode frame")
    };

    let auth = read_frame();
    let SensorMessage::Auth { event } = auth else {
        panic!("expected auth frame first, got {auth:?}");
    };
    assert_eq!(event.event_type, EventType::ProcessCreate);
    assert_ne!(event.event_id, 0);
    wait_until(|| runtime.pending_auth() == 1);

    let notify = read_frame();
    let SensorMessage::Notify { event: file_event } = notify else {
        panic!("expected notify frame, got {notify:?}");
    };
    assert_eq!(file_event.event_type, EventType::FileCreate);

    let dns_frame = read_frame();
    let SensorMessage::Notify { event: dns_event } = dns_frame else {
        panic!("expected dns notify frame, got {dns_frame:?}");
    };
    assert_eq!(dns_event.event_type, EventType::DnsQuery);
    assert_eq!(dns_event.prop("query"), Some("cairn.test"));

    // Manager verdict settles the pending request.
    let mut manager = reader.into_inner();
    writeln!(
        manager,
        r#"{{"kind":"reply_auth","event_id":{},"allow":true}}"#,
        event.event_id
    )
    .expect("write reply");
    manager.flush().expect("flush");
    wait_until(|| runtime.pending_auth() == 0);

    runtime.shutdown();
    assert!(!config.socket_path.exists());
}

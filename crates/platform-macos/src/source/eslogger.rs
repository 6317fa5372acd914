//! Live capture through an `eslogger --format json` subprocess.
//!
//! eslogger is shipped with macOS and speaks for the system event facility
//! without requiring our own entitlement. It cannot hold an action pending,
//! so everything it reports is delivered as a notification; process-create
//! events still flow through the identity lists for audit verdicts. The
//! JSON decoder is platform-neutral so it stays testable off-box.

use serde_json::Value;

use sensor_core::{props, CapturedEvent, EventType, FileIdentity, SensorEvent};

use crate::identity::file_identity;

/// Override the eslogger binary, mainly for harnesses.
pub const ESLOGGER_BIN_ENV: &str = "CAIRN_ESLOGGER_BIN";

/// Event classes passed to eslogger on the command line.
#[cfg(target_os = "macos")]
const SUBSCRIPTIONS: &[&str] = &["exec", "exit", "create", "unlink", "rename", "close"];

/// Decode one eslogger output line. `None` means the line is not an event
/// we subscribe to (close without modification, malformed JSON, unknown
/// shape).
pub fn decode_line(raw: &str) -> Option<CapturedEvent> {
    let value = serde_json::from_str::<Value>(raw).ok()?;
    decode_value(&value)
}

fn decode_value(value: &Value) -> Option<CapturedEvent> {
    let payload = value.get("event")?.as_object()?;
    let (kind, body) = payload.iter().next()?;
    let event_type = match kind.as_str() {
        "exec" => EventType::ProcessCreate,
        "exit" => EventType::ProcessExit,
        "create" => EventType::FileCreate,
        "unlink" => EventType::FileDelete,
        "rename" => EventType::FileRename,
        "close" => {
            // Only closes that modified the file are reported.
            if !body.get("modified").and_then(Value::as_bool).unwrap_or(false) {
                return None;
            }
            EventType::FileCloseModify
        }
        _ => return None,
    };

    let mut event = SensorEvent::new(event_type);
    event.pid = lookup_u64(value, &["process", "audit_token", "pid"]).unwrap_or(0) as u32;
    event.ppid = lookup_u64(value, &["process", "ppid"]).unwrap_or(0) as u32;
    event.exec_path =
        lookup_string(value, &["process", "executable", "path"]).unwrap_or_default();
    let uid = lookup_u64(value, &["process", "audit_token", "euid"]).map(|raw| raw as u32);

    match event_type {
        EventType::ProcessCreate => {
            // The exec target replaces the subject image.
            if let Some(target) =
                lookup_string(body, &["target", "executable", "path"])
            {
                event.exec_path = target;
            }
            if let Some(args) = body.get("args").and_then(Value::as_array) {
                event.args = args
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect();
            }
            if let Some(cwd) = lookup_string(body, &["cwd", "path"]) {
                event.working_dir = cwd;
            }
            if let Some(signing) = lookup_string(body, &["target", "signing_id"]) {
                event.set_prop(props::CODE_SIGN, signing);
            }
            if let Some(team) = lookup_string(body, &["target", "team_id"]) {
                event.set_prop(props::BUNDLE_ID, team);
            }
        }
        EventType::ProcessExit => {
            if let Some(stat) = body.get("stat").and_then(Value::as_i64) {
                event.set_prop(props::EXIT_CODE, stat.to_string());
            }
        }
        EventType::FileCreate => {
            let path = lookup_string(body, &["destination", "existing_file", "path"])
                .or_else(|| {
                    let dir = lookup_string(body, &["destination", "new_path", "dir", "path"]);
                    let name = lookup_string(body, &["destination", "new_path", "filename"]);
                    match (dir, name) {
                        (Some(dir), Some(name)) => Some(format!("{dir}/{name}")),
                        _ => None,
                    }
                })
                .unwrap_or_default();
            event.set_prop(props::FILE_PATH, path);
        }
        EventType::FileDelete => {
            if let Some(path) = lookup_string(body, &["target", "path"]) {
                event.set_prop(props::FILE_PATH, path);
            }
        }
        EventType::FileRename => {
            if let Some(src) = lookup_string(body, &["source", "path"]) {
                event.set_prop(props::SRC_PATH, src);
            }
            let dst = lookup_string(body, &["destination", "existing_file", "path"]).or_else(|| {
                let dir = lookup_string(body, &["destination", "new_path", "dir", "path"]);
                let name = lookup_string(body, &["destination", "new_path", "filename"]);
                match (dir, name) {
                    (Some(dir), Some(name)) => Some(format!("{dir}/{name}")),
                    _ => None,
                }
            });
            if let Some(dst) = dst {
                event.set_prop(props::DST_PATH, dst);
            }
        }
        EventType::FileCloseModify => {
            if let Some(path) = lookup_string(body, &["target", "path"]) {
                event.set_prop(props::FILE_PATH, path);
            }
        }
        _ => {}
    }

    // Identities come from the stat block captured inside the event. By the
    // time a delete or rename is reported the path can already point at
    // nothing, or at a different file; re-statting it is only a fallback for
    // records that carry no stat block.
    let exec_identity = match event_type {
        EventType::ProcessCreate => identity_at(body, &["target", "executable", "stat"]),
        _ => identity_at(value, &["process", "executable", "stat"]),
    }
    .or_else(|| {
        non_empty(&event.exec_path).and_then(|path| file_identity(std::path::Path::new(path)))
    });

    let affected_identity = match event_type {
        EventType::FileDelete | EventType::FileCloseModify => {
            identity_at(body, &["target", "stat"])
        }
        EventType::FileCreate => identity_at(body, &["destination", "existing_file", "stat"]),
        EventType::FileRename => identity_at(body, &["source", "stat"]),
        _ => None,
    }
    .or_else(|| {
        let path = match event_type {
            EventType::FileRename => event.prop(props::SRC_PATH),
            _ => event.prop(props::FILE_PATH),
        }?;
        file_identity(std::path::Path::new(path))
    });

    Some(CapturedEvent {
        uid,
        exec_identity,
        file_identity: affected_identity,
        proc_identity: exec_identity,
        token: None,
        dns_payload: None,
        event,
    })
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn lookup_string(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str().map(str::to_string)
}

fn lookup_u64(value: &Value, path: &[&str]) -> Option<u64> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current.as_u64()
}

/// Read a `st_dev`/`st_ino` pair out of an embedded stat block. `st_dev`
/// serializes as a signed integer.
fn identity_at(value: &Value, path: &[&str]) -> Option<FileIdentity> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    let dev = current.get("st_dev").and_then(Value::as_i64)?;
    let ino = current.get("st_ino").and_then(Value::as_u64)?;
    Some(FileIdentity::from_dev_ino(dev as u64, ino))
}

// -- subprocess backend (macOS only) ----------------------------------------

#[cfg(target_os = "macos")]
mod live {
    use std::io::BufRead;
    use std::process::{Child, Command, Stdio};
    use std::sync::Arc;
    use std::thread::JoinHandle;

    use sensor_core::{EventIntake, SecuritySource, SourceError, SourceState};

    use super::{decode_line, ESLOGGER_BIN_ENV, SUBSCRIPTIONS};

    pub struct EsloggerSource {
        state: SourceState,
        child: Option<Child>,
        reader: Option<JoinHandle<()>>,
    }

    impl EsloggerSource {
        pub fn new() -> Self {
            Self {
                state: SourceState::Uninitialized,
                child: None,
                reader: None,
            }
        }
    }

    impl Default for EsloggerSource {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SecuritySource for EsloggerSource {
        fn start(&mut self, intake: Arc<dyn EventIntake>) -> Result<(), SourceError> {
            if !matches!(self.state, SourceState::Uninitialized) {
                return Err(SourceError::SubscribeFailed(
                    "eslogger source already started".to_string(),
                ));
            }

            let binary = std::env::var(ESLOGGER_BIN_ENV)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| "eslogger".to_string());

            let mut child = Command::new(&binary)
                .args(SUBSCRIPTIONS)
                .args(["--format", "json"])
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|err| {
                    // TCC denial and a missing binary both land here.
                    SourceError::SubscribeFailed(format!("spawn {binary}: {err}"))
                })?;

            let stdout = child.stdout.take().ok_or_else(|| {
                SourceError::SubscribeFailed("eslogger stdout pipe unavailable".to_string())
            })?;
            self.state = SourceState::Subscribed;

            self.reader = Some(std::thread::spawn(move || {
                let reader = std::io::BufReader::new(stdout);
                let mut skipped = 0u64;
                for line in reader.lines() {
                    let Ok(line) = line else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match decode_line(&line) {
                        Some(captured) => intake.deliver(captured),
                        None => skipped += 1,
                    }
                }
                tracing::info!(skipped, "eslogger stream closed");
            }));

            self.child = Some(child);
            self.state = SourceState::Monitoring;
            Ok(())
        }

        fn stop(&mut self) {
            if !matches!(self.state, SourceState::Subscribed | SourceState::Monitoring) {
                return;
            }
            if let Some(mut child) = self.child.take() {
                if let Ok(None) = child.try_wait() {
                    let _ = child.kill();
                }
                let _ = child.wait();
            }
            if let Some(handle) = self.reader.take() {
                let _ = handle.join();
            }
            self.state = SourceState::Unsubscribed;
        }

        fn state(&self) -> SourceState {
            self.state
        }
    }

    impl Drop for EsloggerSource {
        fn drop(&mut self) {
            self.stop();
        }
    }
}

#[cfg(target_os = "macos")]
pub use live::EsloggerSource;

#[cfg(test)]
mod tests {
    use super::*;
    use sensor_core::props;

    #[test]
    fn exec_line_becomes_a_process_create() {
        let line = r#"{
            "process": {
                "audit_token": {"pid": 812, "euid": 501},
                "ppid": 1,
                "executable": {"path": "/usr/bin/zsh"}
            },
            "event": {
                "exec": {
                    "target": {"executable": {"path": "/usr/bin/curl"}, "signing_id": "com.apple.curl"},
                    "args": ["curl", "https://example.test"],
                    "cwd": {"path": "/Users/alice"}
                }
            }
        }"#;

        let captured = decode_line(line).expect("exec decodes");
        assert_eq!(captured.event.event_type, EventType::ProcessCreate);
        assert_eq!(captured.event.pid, 812);
        assert_eq!(captured.event.ppid, 1);
        assert_eq!(captured.uid, Some(501));
        assert_eq!(captured.event.exec_path, "/usr/bin/curl");
        assert_eq!(captured.event.working_dir, "/Users/alice");
        assert_eq!(captured.event.args, vec!["curl", "https://example.test"]);
        assert_eq!(captured.event.prop(props::CODE_SIGN), Some("com.apple.curl"));
        assert!(captured.token.is_none());
    }

    #[test]
    fn exit_line_carries_the_status() {
        let line = r#"{
            "process": {"audit_token": {"pid": 812, "euid": 501}, "executable": {"path": "/usr/bin/curl"}},
            "event": {"exit": {"stat": 3}}
        }"#;

        let captured = decode_line(line).expect("exit decodes");
        assert_eq!(captured.event.event_type, EventType::ProcessExit);
        assert_eq!(captured.event.prop(props::EXIT_CODE), Some("3"));
    }

    #[test]
    fn rename_line_keeps_both_paths() {
        let line = r#"{
            "process": {"audit_token": {"pid": 9, "euid": 0}, "executable": {"path": "/bin/mv"}},
            "event": {
                "rename": {
                    "source": {"path": "/tmp/a"},
                    "destination": {"new_path": {"dir": {"path": "/tmp"}, "filename": "b"}}
                }
            }
        }"#;

        let captured = decode_line(line).expect("rename decodes");
        assert_eq!(captured.event.event_type, EventType::FileRename);
        assert_eq!(captured.event.prop(props::SRC_PATH), Some("/tmp/a"));
        assert_eq!(captured.event.prop(props::DST_PATH), Some("/tmp/b"));
    }

    #[test]
    fn unmodified_close_is_dropped() {
        let line = r#"{
            "process": {"audit_token": {"pid": 9, "euid": 0}, "executable": {"path": "/bin/cat"}},
            "event": {"close": {"modified": false, "target": {"path": "/etc/hosts"}}}
        }"#;
        assert!(decode_line(line).is_none());

        let modified = line.replace("\"modified\": false", "\"modified\": true");
        let captured = decode_line(&modified).expect("modified close decodes");
        assert_eq!(captured.event.event_type, EventType::FileCloseModify);
        assert_eq!(captured.event.prop(props::FILE_PATH), Some("/etc/hosts"));
    }

    #[test]
    fn delete_identity_comes_from_the_event_stat_block() {
        // The target path is unlinked before the event is reported, so the
        // identity must come from the embedded stat, not from the filesystem.
        let line = r#"{
            "process": {
                "audit_token": {"pid": 77, "euid": 0},
                "executable": {"path": "/bin/rm", "stat": {"st_dev": 16777234, "st_ino": 4242}}
            },
            "event": {
                "unlink": {
                    "target": {"path": "/tmp/cairn-already-gone", "stat": {"st_dev": 16777234, "st_ino": 99881}}
                }
            }
        }"#;

        let captured = decode_line(line).expect("unlink decodes");
        assert_eq!(captured.event.event_type, EventType::FileDelete);
        assert_eq!(
            captured.file_identity,
            Some(FileIdentity::from_dev_ino(16777234, 99881))
        );
        assert_eq!(
            captured.exec_identity,
            Some(FileIdentity::from_dev_ino(16777234, 4242))
        );
    }

    #[test]
    fn exec_target_stat_yields_the_exec_identity() {
        let line = r#"{
            "process": {
                "audit_token": {"pid": 5, "euid": 501},
                "executable": {"path": "/usr/bin/zsh", "stat": {"st_dev": 1, "st_ino": 11}}
            },
            "event": {
                "exec": {
                    "target": {"executable": {"path": "/usr/local/bin/tool", "stat": {"st_dev": 1, "st_ino": 2200}}}
                }
            }
        }"#;

        let captured = decode_line(line).expect("exec decodes");
        assert_eq!(
            captured.exec_identity,
            Some(FileIdentity::from_dev_ino(1, 2200))
        );
    }

    #[test]
    fn unknown_shapes_and_garbage_are_skipped() {
        assert!(decode_line("not json").is_none());
        assert!(decode_line("{}").is_none());
        assert!(decode_line(r#"{"event": {"mmap": {}}}"#).is_none());
    }
}

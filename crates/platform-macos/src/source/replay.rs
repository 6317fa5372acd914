//! NDJSON replay source.
//!
//! Replays a captured event trace, one JSON record per line, through the
//! same intake the live backend uses. Records marked `authorize` carry an
//! auth token whose verdict is logged, so the full authorization path is
//! exercised off-box.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};

use sensor_core::{
    AuthToken, CapturedEvent, DnsPayload, EventIntake, EventType, FileIdentity, SecuritySource,
    SensorEvent, SourceError, SourceState,
};

/// One line of a replay trace.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub event: SensorEvent,
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub exec_identity: Option<FileIdentity>,
    #[serde(default)]
    pub file_identity: Option<FileIdentity>,
    #[serde(default)]
    pub proc_identity: Option<FileIdentity>,
    /// When set on a process-create record, the event is delivered as an
    /// authorization request instead of a notification.
    #[serde(default)]
    pub authorize: bool,
    /// Raw DNS message bytes for network records, fanned out by the
    /// dispatcher.
    #[serde(default)]
    pub dns_payload: Option<Vec<u8>>,
    /// "udp" (default) or "tcp"; only meaningful with `dns_payload`.
    #[serde(default)]
    pub dns_transport: Option<String>,
}

pub struct ReplaySource {
    path: PathBuf,
    state: SourceState,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ReplaySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: SourceState::Uninitialized,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl SecuritySource for ReplaySource {
    fn start(&mut self, intake: Arc<dyn EventIntake>) -> Result<(), SourceError> {
        if !matches!(self.state, SourceState::Uninitialized) {
            return Err(SourceError::SubscribeFailed(
                "replay source already started".to_string(),
            ));
        }

        let file = std::fs::File::open(&self.path).map_err(|err| {
            SourceError::NotAvailable(format!("open replay trace {}: {err}", self.path.display()))
        })?;
        self.state = SourceState::Subscribed;

        let stop = self.stop.clone();
        let path = self.path.clone();
        self.worker = Some(std::thread::spawn(move || {
            let reader = std::io::BufReader::new(file);
            let mut delivered = 0u64;
            let mut skipped = 0u64;
            for line in reader.lines() {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        tracing::warn!(error = %err, "replay trace read failed, stopping");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ReplayRecord>(&line) {
                    Ok(record) => {
                        intake.deliver(captured_from_record(record));
                        delivered += 1;
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "skipping malformed replay record");
                        skipped += 1;
                    }
                }
            }
            tracing::info!(path = %path.display(), delivered, skipped, "replay trace drained");
        }));

        self.state = SourceState::Monitoring;
        Ok(())
    }

    fn stop(&mut self) {
        if !matches!(self.state, SourceState::Subscribed | SourceState::Monitoring) {
            return;
        }
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.state = SourceState::Unsubscribed;
    }

    fn state(&self) -> SourceState {
        self.state
    }
}

impl Drop for ReplaySource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn captured_from_record(record: ReplayRecord) -> CapturedEvent {
    let token = if record.authorize && record.event.event_type == EventType::ProcessCreate {
        let pid = record.event.pid;
        let exec_path = record.event.exec_path.clone();
        Some(AuthToken::new(move |decision| {
            tracing::info!(pid, exec_path, ?decision, "replayed exec authorized");
        }))
    } else {
        None
    };

    let dns_payload = record.dns_payload.map(|data| DnsPayload {
        transport: match record.dns_transport.as_deref() {
            Some("tcp") => dns_wire::Transport::Tcp,
            _ => dns_wire::Transport::Udp,
        },
        data,
    });

    CapturedEvent {
        event: record.event,
        uid: record.uid,
        exec_identity: record.exec_identity,
        file_identity: record.file_identity,
        proc_identity: record.proc_identity,
        token,
        dns_payload,
    }
}

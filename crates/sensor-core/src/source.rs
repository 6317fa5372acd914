//! Security-event source boundary.
//!
//! The OS-facing backends (eslogger ingest, NDJSON replay) live in the
//! platform crate; they normalize each raw callback into a
//! [`CapturedEvent`] and hand it to the pipeline through [`EventIntake`].

use std::fmt;
use std::sync::Arc;

use crate::authorizer::AuthToken;
use crate::event::SensorEvent;
use crate::identity::FileIdentity;

/// Subscription lifecycle. A source moves `Uninitialized -> Subscribed ->
/// Monitoring` on a successful start and ends at `Unsubscribed`; stopping
/// an already-stopped source is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Uninitialized,
    Subscribed,
    Monitoring,
    Unsubscribed,
}

/// Startup failures are fatal and reported, never panicked on. There is no
/// degraded-capture mode.
#[derive(Debug)]
pub enum SourceError {
    MissingEntitlement,
    SubscribeFailed(String),
    NotAvailable(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingEntitlement => {
                f.write_str("missing security-event entitlement")
            }
            Self::SubscribeFailed(msg) => write!(f, "event subscription failed: {msg}"),
            Self::NotAvailable(msg) => write!(f, "event source not available: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// Raw DNS message lifted from intercepted socket traffic, parsed by the
/// dispatcher into per-question events.
pub struct DnsPayload {
    pub transport: dns_wire::Transport,
    pub data: Vec<u8>,
}

/// One normalized OS callback. `token` is present exactly when the subject
/// action is blocked awaiting a decision; the identities are the stable
/// file identities consulted against the lists.
pub struct CapturedEvent {
    pub event: SensorEvent,
    pub uid: Option<u32>,
    pub exec_identity: Option<FileIdentity>,
    pub file_identity: Option<FileIdentity>,
    pub proc_identity: Option<FileIdentity>,
    pub token: Option<AuthToken>,
    pub dns_payload: Option<DnsPayload>,
}

impl CapturedEvent {
    pub fn notify(event: SensorEvent) -> Self {
        Self {
            event,
            uid: None,
            exec_identity: None,
            file_identity: None,
            proc_identity: None,
            token: None,
            dns_payload: None,
        }
    }
}

/// Pipeline entry point implemented by the dispatcher.
pub trait EventIntake: Send + Sync {
    fn deliver(&self, captured: CapturedEvent);
}

/// Capability interface over the OS security-event source. One
/// implementation is selected at startup by availability probing.
pub trait SecuritySource: Send {
    fn start(&mut self, intake: Arc<dyn EventIntake>) -> Result<(), SourceError>;
    fn stop(&mut self);
    fn state(&self) -> SourceState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_messages_name_the_failure_kind() {
        let err = SourceError::SubscribeFailed("broken pipe".to_string());
        assert!(err.to_string().contains("subscription failed"));
        assert!(SourceError::MissingEntitlement
            .to_string()
            .contains("entitlement"));
    }
}

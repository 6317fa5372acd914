//! Event dispatch: classification, enrichment, and routing.
//!
//! Receives normalized [`CapturedEvent`]s from the active source, consults
//! the identity lists, enriches from the process cache, and forwards to the
//! management channel as either an authorization request or a notify event.
//! DNS payloads from the network-flow tap fan out through the wire parser
//! into one DnsQuery notify per question.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::authorizer::{AuthDecision, AuthToken, Authorizer};
use crate::event::{props, EventType, SensorEvent};
use crate::identity::{ExecVerdict, FileIdentity, IdentityLists};
use crate::introspect::UserCache;
use crate::process_cache::ProcessCache;
use crate::source::{CapturedEvent, DnsPayload, EventIntake};

/// Outbound side of the management channel, as seen by the pipeline.
/// `send_auth` reports delivery so the caller can fail open when the peer
/// is unreachable; notify delivery is best-effort.
pub trait EventOutbound: Send + Sync {
    fn send_auth(&self, event: &SensorEvent) -> bool;
    fn send_notify(&self, event: &SensorEvent);
    fn is_connected(&self) -> bool;
}

pub struct Dispatcher {
    cache: Arc<ProcessCache>,
    lists: Arc<IdentityLists>,
    authorizer: Arc<Authorizer>,
    users: Arc<UserCache>,
    outbound: Arc<dyn EventOutbound>,
}

impl Dispatcher {
    pub fn new(
        cache: Arc<ProcessCache>,
        lists: Arc<IdentityLists>,
        authorizer: Arc<Authorizer>,
        users: Arc<UserCache>,
        outbound: Arc<dyn EventOutbound>,
    ) -> Self {
        Self {
            cache,
            lists,
            authorizer,
            users,
            outbound,
        }
    }

    pub fn handle(&self, captured: CapturedEvent) {
        let CapturedEvent {
            mut event,
            uid,
            exec_identity,
            file_identity,
            proc_identity,
            token,
            dns_payload,
        } = captured;

        if event.user.is_empty() {
            if let Some(uid) = uid {
                event.user = self.users.resolve(uid);
            }
        }

        if let Some(DnsPayload { transport, data }) = dns_payload {
            if let Some(token) = token {
                // A lookup never gates the subject; release it right away
                // rather than dropping an unanswered token.
                debug!(pid = event.pid, "releasing pending action on lookup event");
                token.answer(AuthDecision::Allow);
            }
            self.handle_dns_payload(&event, &data, transport);
            return;
        }

        match token {
            Some(token) => self.handle_auth(event, exec_identity, token),
            None => self.handle_notify(event, file_identity, proc_identity),
        }
    }

    /// Authorization path: the subject process is blocked until answered.
    fn handle_auth(&self, mut event: SensorEvent, exec_identity: Option<FileIdentity>, token: AuthToken) {
        if !self.outbound.is_connected() {
            // No manager to decide; never hold a launch hostage.
            debug!(pid = event.pid, "no manager connection, allowing exec");
            token.answer(AuthDecision::Allow);
            return;
        }

        let verdict = exec_identity
            .map(|identity| self.lists.classify_exec(identity))
            .unwrap_or(ExecVerdict::Unclassified);

        match verdict {
            ExecVerdict::Denied => {
                // Fail fast: no round-trip to the manager for a listed deny.
                info!(path = %event.exec_path, "exec denied by identity list");
                token.answer(AuthDecision::Deny);
            }
            ExecVerdict::Allowed => {
                info!(path = %event.exec_path, "exec allowed by identity list");
                token.answer(AuthDecision::Allow);
                // Still forwarded for audit visibility.
                self.cache.update(&event);
                self.outbound.send_notify(&event);
            }
            ExecVerdict::Unclassified => {
                event.event_id = self.authorizer.next_event_id();
                self.cache.update(&event);
                self.authorizer.track(event.event_id, token);
                if !self.outbound.send_auth(&event) {
                    warn!(
                        event_id = event.event_id,
                        "failed forwarding auth event, allowing"
                    );
                    self.authorizer.resolve(event.event_id, AuthDecision::Allow);
                }
            }
        }
    }

    /// Notify path: informational events, no reply expected.
    fn handle_notify(
        &self,
        mut event: SensorEvent,
        file_identity: Option<FileIdentity>,
        proc_identity: Option<FileIdentity>,
    ) {
        match event.event_type {
            EventType::ProcessCreate => self.cache.update(&event),
            _ => self.cache.enrich(&mut event),
        }

        if event.event_type.is_file_event() {
            let file = file_identity.unwrap_or(FileIdentity(0));
            let process = proc_identity.unwrap_or(FileIdentity(0));
            if self.lists.is_filtered_file(file, process) {
                debug!(pid = event.pid, "file event muted by filter list");
                return;
            }
        }

        if !self.outbound.is_connected() {
            return;
        }
        self.outbound.send_notify(&event);
    }

    /// Parse an intercepted DNS payload and emit one DnsQuery notify per
    /// question/answer correlation. Malformed payloads yield nothing.
    pub fn handle_dns_payload(
        &self,
        base: &SensorEvent,
        payload: &[u8],
        transport: dns_wire::Transport,
    ) {
        for exchange in dns_wire::parse_message(payload, transport) {
            let mut event = base.clone();
            event.event_type = EventType::DnsQuery;
            event.set_prop(props::DOMAIN_NAME, exchange.domain_name);
            event.set_prop(props::QUERY_STATUS, exchange.reply_code.to_string());
            event.set_prop(props::REPLY_RESULT, exchange.query_result);
            self.handle_notify(event, None, None);
        }
    }
}

impl EventIntake for Dispatcher {
    fn deliver(&self, captured: CapturedEvent) {
        self.handle(captured);
    }
}

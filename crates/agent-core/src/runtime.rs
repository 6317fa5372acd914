//! Runtime wiring and lifecycle.
//!
//! `SensorRuntime::start` builds the pipeline (user cache, process cache,
//! identity lists, authorizer, dispatcher, management channel) and
//! `begin_capture` attaches the event source. Shutdown is ordered: stop
//! capture first, then drain pending authorizations fail-open, then close
//! the channel.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::{reload, EnvFilter, Registry};

use mgmt_channel::{ChannelServer, ControlHandler};
use platform_macos::{select_source, system_user_lookup, PlatformIntrospect};
use sensor_core::{
    AuthDecision, Authorizer, Dispatcher, EventOutbound, FileIdentity, IdentityLists, MuteType,
    ProcessCache, ProcessIntrospect, SecuritySource,
};

use crate::config::SensorConfig;

pub type LogReloadHandle = reload::Handle<EnvFilter, Registry>;

/// Install the global subscriber. `RUST_LOG` wins over the configured
/// default; the returned handle backs the manager's set-log-level push.
pub fn init_logging(default_level: &str) -> LogReloadHandle {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    handle
}

pub struct SensorRuntime {
    source: Box<dyn SecuritySource>,
    channel: ChannelServer,
    dispatcher: Arc<Dispatcher>,
    cache: Arc<ProcessCache>,
    authorizer: Arc<Authorizer>,
    introspect: PlatformIntrospect,
}

impl SensorRuntime {
    /// Wire the pipeline and bind the management socket. Capture does not
    /// start until [`begin_capture`](Self::begin_capture).
    pub fn start(config: &SensorConfig, log: LogReloadHandle) -> anyhow::Result<Self> {
        let users = Arc::new(system_user_lookup());
        let introspect = PlatformIntrospect::new();

        let cache = Arc::new(ProcessCache::new());
        cache.init(&introspect, &users);
        info!(entries = cache.len(), "process cache primed");

        let lists = Arc::new(IdentityLists::new());
        let snapshot = match &config.list_snapshot_path {
            Some(path) if path.exists() => match ListSnapshot::load(path) {
                Ok(snapshot) => {
                    snapshot.apply(&lists);
                    info!(path = %path.display(), "identity lists restored");
                    snapshot
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "discarding unreadable list snapshot");
                    ListSnapshot::default()
                }
            },
            _ => ListSnapshot::default(),
        };

        let authorizer = Arc::new(Authorizer::new(Duration::from_millis(config.auth_timeout_ms)));

        if let Some(parent) = config.socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating socket directory {}", parent.display()))?;
        }
        let bridge = Arc::new(ControlBridge {
            authorizer: authorizer.clone(),
            lists: lists.clone(),
            log,
            snapshot_path: config.list_snapshot_path.clone(),
            snapshot: Mutex::new(snapshot),
        });
        let channel = ChannelServer::start(config.socket_path.clone(), bridge)
            .with_context(|| format!("binding {}", config.socket_path.display()))?;

        let dispatcher = Arc::new(Dispatcher::new(
            cache.clone(),
            lists,
            authorizer.clone(),
            users,
            Arc::new(channel.handle()),
        ));

        let source = select_source(config.replay_path.as_deref())?;

        Ok(Self {
            source,
            channel,
            dispatcher,
            cache,
            authorizer,
            introspect,
        })
    }

    /// Subscribe the event source and start delivering into the pipeline.
    pub fn begin_capture(&mut self) -> anyhow::Result<()> {
        self.source
            .start(self.dispatcher.clone())
            .context("starting event capture")?;
        info!(state = ?self.source.state(), "event capture started");
        Ok(())
    }

    /// Drop cache entries whose pid no longer exists.
    pub fn sweep(&self) {
        let live = self.introspect.list_pids();
        if live.is_empty() {
            // Introspection unavailable; keep what we have.
            return;
        }
        let removed = self.cache.sweep(&live);
        info!(removed, remaining = self.cache.len(), "process cache swept");
    }

    /// Authorization requests currently awaiting a manager verdict.
    pub fn pending_auth(&self) -> usize {
        self.authorizer.pending_count()
    }

    /// Whether a manager is currently attached to the channel.
    pub fn manager_connected(&self) -> bool {
        self.channel.handle().is_connected()
    }

    pub fn shutdown(mut self) {
        self.source.stop();
        // Anything still pending is released, never left blocked.
        self.authorizer.shutdown();
        self.channel.stop();
        info!("sensor runtime stopped");
    }
}

/// Manager pushes applied to the live pipeline.
struct ControlBridge {
    authorizer: Arc<Authorizer>,
    lists: Arc<IdentityLists>,
    log: LogReloadHandle,
    snapshot_path: Option<PathBuf>,
    snapshot: Mutex<ListSnapshot>,
}

impl ControlHandler for ControlBridge {
    fn reply_auth(&self, event_id: u64, allow: bool) {
        let decision = if allow {
            AuthDecision::Allow
        } else {
            AuthDecision::Deny
        };
        if !self.authorizer.resolve(event_id, decision) {
            tracing::debug!(event_id, "verdict for unknown or settled request");
        }
    }

    fn update_mute_list(&self, mute_type: MuteType, identities: Vec<FileIdentity>) {
        self.lists.replace(&identities, mute_type);
        info!(?mute_type, count = identities.len(), "identity list replaced");

        if let Some(path) = &self.snapshot_path {
            let mut snapshot = match self.snapshot.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *snapshot.slot_mut(mute_type) = identities;
            if let Err(err) = snapshot.save(path) {
                warn!(path = %path.display(), error = %err, "failed persisting list snapshot");
            }
        }
    }

    fn set_log_level(&self, level: &str) {
        match EnvFilter::try_new(level) {
            Ok(filter) => {
                if self.log.reload(filter).is_err() {
                    warn!("log filter reload failed, subscriber gone");
                } else {
                    info!(level, "log level updated by manager");
                }
            }
            Err(err) => warn!(level, error = %err, "rejecting invalid log level"),
        }
    }
}

/// On-disk mirror of the four identity lists.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct ListSnapshot {
    #[serde(default)]
    allow_exec: Vec<FileIdentity>,
    #[serde(default)]
    deny_exec: Vec<FileIdentity>,
    #[serde(default)]
    filter_by_file: Vec<FileIdentity>,
    #[serde(default)]
    filter_by_proc: Vec<FileIdentity>,
}

impl ListSnapshot {
    fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, path: &Path) -> anyhow::Result<()> {
        let encoded = serde_json::to_string_pretty(self)?;
        std::fs::write(path, encoded)?;
        Ok(())
    }

    fn apply(&self, lists: &IdentityLists) {
        lists.replace(&self.allow_exec, MuteType::AllowProcExec);
        lists.replace(&self.deny_exec, MuteType::DenyProcExec);
        lists.replace(&self.filter_by_file, MuteType::FilterFileByFilePath);
        lists.replace(&self.filter_by_proc, MuteType::FilterFileByProcPath);
    }

    fn slot_mut(&mut self, mute: MuteType) -> &mut Vec<FileIdentity> {
        match mute {
            MuteType::AllowProcExec => &mut self.allow_exec,
            MuteType::DenyProcExec => &mut self.deny_exec,
            MuteType::FilterFileByFilePath => &mut self.filter_by_file,
            MuteType::FilterFileByProcPath => &mut self.filter_by_proc,
        }
    }
}

#[cfg(test)]
mod tests {
    use sensor_core::ExecVerdict;

    use super::*;

    fn test_log_handle() -> LogReloadHandle {
        let (_, handle) = reload::Layer::new(EnvFilter::new("info"));
        handle
    }

    fn bridge(snapshot_path: Option<PathBuf>) -> (Arc<ControlBridge>, Arc<IdentityLists>) {
        let lists = Arc::new(IdentityLists::new());
        let bridge = Arc::new(ControlBridge {
            authorizer: Arc::new(Authorizer::new(Duration::from_secs(60))),
            lists: lists.clone(),
            log: test_log_handle(),
            snapshot_path,
            snapshot: Mutex::new(ListSnapshot::default()),
        });
        (bridge, lists)
    }

    #[test]
    fn list_push_is_applied_and_persisted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("lists.json");
        let (bridge, lists) = bridge(Some(path.clone()));

        bridge.update_mute_list(MuteType::DenyProcExec, vec![FileIdentity(77)]);
        assert_eq!(lists.classify_exec(FileIdentity(77)), ExecVerdict::Denied);

        let reloaded = ListSnapshot::load(&path).expect("snapshot reloads");
        assert_eq!(reloaded.deny_exec, vec![FileIdentity(77)]);
        assert!(reloaded.allow_exec.is_empty());
    }

    #[test]
    fn snapshot_restores_all_four_lists() {
        let snapshot = ListSnapshot {
            allow_exec: vec![FileIdentity(1)],
            deny_exec: vec![FileIdentity(2)],
            filter_by_file: vec![FileIdentity(3)],
            filter_by_proc: vec![FileIdentity(4)],
        };
        let lists = IdentityLists::new();
        snapshot.apply(&lists);

        assert_eq!(lists.classify_exec(FileIdentity(1)), ExecVerdict::Allowed);
        assert_eq!(lists.classify_exec(FileIdentity(2)), ExecVerdict::Denied);
        assert!(lists.is_filtered_file(FileIdentity(3), FileIdentity(0)));
        assert!(lists.is_filtered_file(FileIdentity(0), FileIdentity(4)));
    }

    #[test]
    fn verdict_replies_settle_pending_requests() {
        let (bridge, _) = bridge(None);
        let answered = Arc::new(Mutex::new(Vec::new()));
        let log = answered.clone();
        let token = sensor_core::AuthToken::new(move |decision| {
            log.lock().unwrap().push(decision);
        });

        let event_id = bridge.authorizer.next_event_id();
        bridge.authorizer.track(event_id, token);
        bridge.reply_auth(event_id, false);

        assert_eq!(*answered.lock().unwrap(), vec![AuthDecision::Deny]);
        // A second reply for the same id is a no-op.
        bridge.reply_auth(event_id, true);
        assert_eq!(*answered.lock().unwrap(), vec![AuthDecision::Deny]);
    }

    #[test]
    fn invalid_log_level_is_rejected_quietly() {
        let (bridge, _) = bridge(None);
        bridge.set_log_level("definitely[not]a{filter");
        bridge.set_log_level("debug");
    }
}

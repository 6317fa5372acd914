//! Pid-keyed process metadata cache used for event enrichment.
//!
//! Entries are created from ProcessCreate events (or the startup snapshot)
//! and removed by a periodic sweep against the live pid set. The cache is
//! eventually consistent: a miss means ProcessCreate has not been observed
//! yet or the entry was evicted, and callers proceed with whatever fields
//! the event already carries.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use crate::event::{props, SensorEvent};
use crate::introspect::{ProcessIntrospect, UserCache};

#[derive(Debug, Clone, Default)]
pub struct ProcessCacheEntry {
    pub user: String,
    pub ppid: u32,
    pub exec_path: String,
    pub working_dir: String,
    pub args: Vec<String>,
    pub bundle_id: Option<String>,
    pub code_sign: Option<String>,
}

pub struct ProcessCache {
    entries: RwLock<HashMap<u32, ProcessCacheEntry>>,
}

impl ProcessCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot every live pid at startup. A lookup failure for one pid
    /// skips that pid only.
    pub fn init(&self, introspect: &dyn ProcessIntrospect, users: &UserCache) {
        let pids = introspect.list_pids();
        let mut snapshot = HashMap::with_capacity(pids.len());

        for pid in pids {
            if pid == 0 {
                continue;
            }
            let Some(exec_path) = introspect.exec_path(pid) else {
                debug!(pid, "skipping pid during cache init, no path");
                continue;
            };
            snapshot.insert(
                pid,
                ProcessCacheEntry {
                    user: introspect.uid(pid).map(|uid| users.resolve(uid)).unwrap_or_default(),
                    ppid: introspect.ppid(pid).unwrap_or_default(),
                    exec_path,
                    working_dir: introspect.working_dir(pid).unwrap_or_default(),
                    args: introspect.args(pid).unwrap_or_default(),
                    bundle_id: None,
                    code_sign: None,
                },
            );
        }

        let count = snapshot.len();
        *self.write() = snapshot;
        debug!(count, "process cache initialized");
    }

    /// Upsert the entry for `event.pid` from a ProcessCreate event.
    pub fn update(&self, event: &SensorEvent) {
        let entry = ProcessCacheEntry {
            user: event.user.clone(),
            ppid: event.ppid,
            exec_path: event.exec_path.clone(),
            working_dir: event.working_dir.clone(),
            args: event.args.clone(),
            bundle_id: event.prop(props::BUNDLE_ID).map(str::to_string),
            code_sign: event.prop(props::CODE_SIGN).map(str::to_string),
        };
        self.write().insert(event.pid, entry);
    }

    /// Fill in fields the event does not already carry. Never overwrites a
    /// populated field; a miss leaves the event unchanged.
    pub fn enrich(&self, event: &mut SensorEvent) {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(entry) = entries.get(&event.pid) else {
            debug!(pid = event.pid, "cache miss during enrichment");
            return;
        };

        if event.user.is_empty() {
            event.user = entry.user.clone();
        }
        if event.ppid == 0 {
            event.ppid = entry.ppid;
        }
        if event.exec_path.is_empty() {
            event.exec_path = entry.exec_path.clone();
        }
        if event.working_dir.is_empty() {
            event.working_dir = entry.working_dir.clone();
        }
        if event.args.is_empty() {
            event.args = entry.args.clone();
        }
        if event.prop(props::BUNDLE_ID).is_none() {
            if let Some(bundle_id) = &entry.bundle_id {
                event.set_prop(props::BUNDLE_ID, bundle_id.clone());
            }
        }
        if event.prop(props::CODE_SIGN).is_none() {
            if let Some(code_sign) = &entry.code_sign {
                event.set_prop(props::CODE_SIGN, code_sign.clone());
            }
        }
    }

    /// Remove every entry whose pid is absent from the live set. Returns the
    /// number of evicted entries.
    pub fn sweep(&self, live_pids: &[u32]) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|pid, _| live_pids.contains(pid));
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "process cache sweep");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<u32, ProcessCacheEntry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for ProcessCache {
    fn default() -> Self {
        Self::new()
    }
}

//! Collaborator traits for OS process introspection, plus the process-wide
//! uid-to-username cache.

use std::collections::HashMap;
use std::sync::RwLock;

/// Per-pid lookups backing cache initialization and enrichment. Every call
/// is best-effort: `None` means the process is gone or inaccessible, never
/// a pipeline error.
pub trait ProcessIntrospect: Send + Sync {
    fn list_pids(&self) -> Vec<u32>;
    fn exec_path(&self, pid: u32) -> Option<String>;
    fn working_dir(&self, pid: u32) -> Option<String>;
    fn args(&self, pid: u32) -> Option<Vec<String>>;
    fn ppid(&self, pid: u32) -> Option<u32>;
    fn uid(&self, pid: u32) -> Option<u32>;
}

type UidLookup = dyn Fn(u32) -> Option<String> + Send + Sync;

/// uid-to-username map, resolved once per uid and cached for the process
/// lifetime (the mapping is effectively immutable while we run). A failed
/// lookup is cached as an empty name so it is not retried per event.
pub struct UserCache {
    names: RwLock<HashMap<u32, String>>,
    lookup: Box<UidLookup>,
}

impl UserCache {
    pub fn new(lookup: impl Fn(u32) -> Option<String> + Send + Sync + 'static) -> Self {
        let mut names = HashMap::new();
        names.insert(0, "root".to_string());
        Self {
            names: RwLock::new(names),
            lookup: Box::new(lookup),
        }
    }

    pub fn resolve(&self, uid: u32) -> String {
        if let Ok(names) = self.names.read() {
            if let Some(name) = names.get(&uid) {
                return name.clone();
            }
        }

        let name = (self.lookup)(uid).unwrap_or_default();
        if let Ok(mut names) = self.names.write() {
            names.insert(uid, name.clone());
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn root_is_preseeded() {
        let users = UserCache::new(|_| None);
        assert_eq!(users.resolve(0), "root");
    }

    #[test]
    fn lookup_runs_once_per_uid() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let users = UserCache::new(move |uid| {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(format!("user{uid}"))
        });

        assert_eq!(users.resolve(501), "user501");
        assert_eq!(users.resolve(501), "user501");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_lookup_is_cached_as_empty() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let users = UserCache::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        });

        assert_eq!(users.resolve(999), "");
        assert_eq!(users.resolve(999), "");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

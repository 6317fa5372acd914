//! Allow/deny/filter identity-list store.
//!
//! Keys are stable file identities (device + inode), not path strings, so a
//! rename neither evades nor falsely matches a rule.

use std::collections::HashSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::event::MuteType;

/// Stable file identity: `(dev << 32) | ino`, invariant across renames
/// within a filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileIdentity(pub u64);

impl FileIdentity {
    pub fn from_dev_ino(dev: u64, ino: u64) -> Self {
        Self((dev << 32) | ino)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecVerdict {
    Allowed,
    Denied,
    Unclassified,
}

#[derive(Default)]
struct Sets {
    allow_exec: HashSet<FileIdentity>,
    deny_exec: HashSet<FileIdentity>,
    filter_file: HashSet<FileIdentity>,
    filter_proc: HashSet<FileIdentity>,
}

impl Sets {
    fn set_for(&mut self, mute: MuteType) -> &mut HashSet<FileIdentity> {
        match mute {
            MuteType::AllowProcExec => &mut self.allow_exec,
            MuteType::DenyProcExec => &mut self.deny_exec,
            MuteType::FilterFileByFilePath => &mut self.filter_file,
            MuteType::FilterFileByProcPath => &mut self.filter_proc,
        }
    }
}

/// The four identity sets consulted synchronously during classification.
/// Low churn, so one coarse mutex covers all of them.
pub struct IdentityLists {
    sets: Mutex<Sets>,
}

impl IdentityLists {
    pub fn new() -> Self {
        Self {
            sets: Mutex::new(Sets::default()),
        }
    }

    pub fn add(&self, identity: FileIdentity, mute: MuteType) {
        self.lock().set_for(mute).insert(identity);
    }

    pub fn remove(&self, identity: FileIdentity, mute: MuteType) {
        self.lock().set_for(mute).remove(&identity);
    }

    /// Replace a whole list, the management channel's bulk-update shape.
    pub fn replace(&self, identities: &[FileIdentity], mute: MuteType) {
        let mut sets = self.lock();
        let set = sets.set_for(mute);
        set.clear();
        set.extend(identities.iter().copied());
    }

    /// Classify an executable identity. Deny is checked first: an identity
    /// erroneously present in both sets fails closed.
    pub fn classify_exec(&self, identity: FileIdentity) -> ExecVerdict {
        let sets = self.lock();
        if sets.deny_exec.contains(&identity) {
            ExecVerdict::Denied
        } else if sets.allow_exec.contains(&identity) {
            ExecVerdict::Allowed
        } else {
            ExecVerdict::Unclassified
        }
    }

    /// Whether a file event should be muted, by the file's own identity or
    /// by the identity of the process that produced it.
    pub fn is_filtered_file(&self, file: FileIdentity, process: FileIdentity) -> bool {
        let sets = self.lock();
        sets.filter_file.contains(&file) || sets.filter_proc.contains(&process)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Sets> {
        match self.sets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for IdentityLists {
    fn default() -> Self {
        Self::new()
    }
}

//! Canonical event record and the enumerations shared by every stage.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Property keys carried in [`SensorEvent::props`].
///
/// The vocabulary is fixed; stages never invent their own keys, so an older
/// peer can ignore keys it does not know without ambiguity.
pub mod props {
    pub const BUNDLE_ID: &str = "bundle_id";
    pub const CODE_SIGN: &str = "code_sign";
    pub const EXIT_CODE: &str = "exit_code";
    pub const FILE_PATH: &str = "file_path";
    pub const SRC_PATH: &str = "from";
    pub const DST_PATH: &str = "move_to";
    pub const PROTOCOL: &str = "protocol";
    pub const LOCAL_ADDR: &str = "local";
    pub const REMOTE_ADDR: &str = "remote";
    pub const DOMAIN_NAME: &str = "query";
    pub const QUERY_STATUS: &str = "status";
    pub const REPLY_RESULT: &str = "reply";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    ProcessCreate,
    ProcessExit,
    FileCreate,
    FileDelete,
    FileRename,
    FileCloseModify,
    NetAccess,
    DnsQuery,
}

impl EventType {
    /// File-mutation kinds are the only ones consulted against the
    /// filter-file lists.
    pub fn is_file_event(self) -> bool {
        matches!(
            self,
            Self::FileCreate | Self::FileDelete | Self::FileRename | Self::FileCloseModify
        )
    }
}

/// Mute-list selector used by the management channel when pushing
/// identity-list mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MuteType {
    AllowProcExec,
    DenyProcExec,
    FilterFileByFilePath,
    FilterFileByProcPath,
}

impl MuteType {
    pub fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::AllowProcExec),
            1 => Some(Self::DenyProcExec),
            2 => Some(Self::FilterFileByFilePath),
            3 => Some(Self::FilterFileByProcPath),
            _ => None,
        }
    }

    pub fn wire_code(self) -> u8 {
        match self {
            Self::AllowProcExec => 0,
            Self::DenyProcExec => 1,
            Self::FilterFileByFilePath => 2,
            Self::FilterFileByProcPath => 3,
        }
    }
}

/// The canonical unit flowing through the whole pipeline.
///
/// `event_id` is nonzero exactly while the event represents an
/// authorization request awaiting a decision; once answered the record is
/// inert. Constructed fresh per OS callback, enriched in place by the
/// process cache, transported once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorEvent {
    pub event_id: u64,
    pub event_type: EventType,
    pub event_time: u64,
    pub pid: u32,
    pub ppid: u32,
    pub user: String,
    pub exec_path: String,
    pub working_dir: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub props: HashMap<String, String>,
}

impl SensorEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_id: 0,
            event_type,
            event_time: unix_now_secs(),
            pid: 0,
            ppid: 0,
            user: String::new(),
            exec_path: String::new(),
            working_dir: String::new(),
            args: Vec::new(),
            props: HashMap::new(),
        }
    }

    /// Insert a property, dropping empty values so enrichment can rely on
    /// "absent key" meaning "unknown".
    pub fn set_prop(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if !value.is_empty() {
            self.props.insert(key.to_string(), value);
        }
    }

    pub fn prop(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    /// True while an authorization decision is outstanding for this event.
    pub fn is_auth_request(&self) -> bool {
        self.event_id != 0
    }
}

impl fmt::Display for SensorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} ts={} pid={} ppid={} user={} path={}",
            self.event_type, self.event_time, self.pid, self.ppid, self.user, self.exec_path
        )
    }
}

pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

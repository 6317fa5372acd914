//! macOS platform layer for the cairn sensor.
//!
//! Three concerns live here:
//! - libproc-backed process introspection (exe path, cwd, argv, ppid, uid)
//! - uid-to-username lookup via POSIX getpwuid_r
//! - security-event source backends (`eslogger --format json` subprocess
//!   ingest on macOS, NDJSON replay everywhere) behind
//!   [`sensor_core::SecuritySource`]
//!
//! Non-macOS builds keep the whole API callable so sensor-core and the
//! agent can be developed and tested off-box; the libproc lookups just
//! return `None` there.

pub mod identity;
pub mod introspect;
pub mod source;
pub mod user;

pub use identity::file_identity;
pub use introspect::PlatformIntrospect;
pub use source::{select_source, ReplaySource};
pub use user::system_user_lookup;

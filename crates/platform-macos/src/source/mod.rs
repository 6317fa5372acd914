//! Security-event source backends.
//!
//! Two implementations of [`sensor_core::SecuritySource`]:
//! - [`ReplaySource`] feeds captured NDJSON traces back through the
//!   pipeline; it works on every platform and backs the integration tests.
//! - [`eslogger::EsloggerSource`] (macOS only) ingests live events from an
//!   `eslogger --format json` subprocess.
//!
//! `select_source` probes availability at startup and picks exactly one.

use std::path::Path;

use sensor_core::{SecuritySource, SourceError};

pub mod eslogger;
pub mod replay;

pub use replay::ReplaySource;

/// Pick the source backend for this run. An explicit replay path always
/// wins; otherwise live capture is used where available.
pub fn select_source(replay_path: Option<&Path>) -> Result<Box<dyn SecuritySource>, SourceError> {
    if let Some(path) = replay_path {
        if !path.is_file() {
            return Err(SourceError::NotAvailable(format!(
                "replay trace {} not found",
                path.display()
            )));
        }
        tracing::info!(path = %path.display(), "using replay event source");
        return Ok(Box::new(ReplaySource::new(path)));
    }

    #[cfg(target_os = "macos")]
    {
        tracing::info!("using eslogger event source");
        Ok(Box::new(eslogger::EsloggerSource::new()))
    }
    #[cfg(not(target_os = "macos"))]
    {
        Err(SourceError::NotAvailable(
            "no live event source on this platform; set a replay trace".to_string(),
        ))
    }
}

use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tracing::info;

use agent_core::runtime::{init_logging, SensorRuntime};
use agent_core::SensorConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let config = SensorConfig::load()?;
    let log_handle = init_logging(&config.log_level);

    let mut runtime = SensorRuntime::start(&config, log_handle)?;
    runtime.begin_capture()?;

    info!(
        socket = %config.socket_path.display(),
        auth_timeout_ms = config.auth_timeout_ms,
        replay = config.replay_path.is_some(),
        "cairn sensor started"
    );

    let mut sweep = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));
    sweep.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = sweep.tick() => {
                runtime.sweep();
            }
        }
    }

    runtime.shutdown();
    info!("cairn sensor stopped");
    Ok(())
}

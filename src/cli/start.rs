//! Start command - Run the supervised gateway daemon.

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::config;
use crate::gateway::Gateway;
use crate::lock::RunLock;
use crate::logging;
use crate::supervisor::{self, Supervisor, SupervisorOptions};

pub async fn cmd_start() -> Result<()> {
    let cfg = config::load_config(None)?;
    let _log_guard = logging::init_logging(&cfg)?;

    let lock_path = config::run_lock_path(&cfg.gateway.profile);
    let lock = RunLock::acquire(lock_path)
        .context("Another gateway instance holds the run lock")?;

    let (event_tx, event_rx) = mpsc::channel(8);
    let signal_task = supervisor::spawn_signal_listener(event_tx);

    let options = SupervisorOptions {
        force_exit_grace: std::time::Duration::from_millis(cfg.gateway.force_exit_grace_ms),
        restart_downtime_hint_ms: cfg.gateway.restart_downtime_hint_ms,
        allow_privileged_restart: cfg.gateway.allow_privileged_restart,
    };
    let supervisor = Supervisor::new(lock, event_rx, options);

    let start_cfg = cfg.clone();
    let result = supervisor
        .run(move || {
            let cfg = start_cfg.clone();
            async move { Gateway::start(cfg).await }
        })
        .await;

    // Dropping the listener uninstalls the signal handlers.
    signal_task.abort();
    result
}

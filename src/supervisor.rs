//! Gateway process supervisor — the state machine that keeps exactly one
//! gateway instance alive, restarts it in-process on request, and never drops
//! the run lock in between.
//!
//! States: `Starting -> Running -> {Stopping -> Stopped | Restarting ->
//! Starting}`. Transitions are driven by discrete events delivered over a
//! channel; OS signals are translated into events by
//! [`spawn_signal_listener`].

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::lock::RunLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Running,
    Stopping,
    Restarting,
    Stopped,
}

/// Events the supervisor reacts to. A privileged restart is only honored when
/// authorized; otherwise it is logged and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    Stop,
    Restart,
    PrivilegedRestart,
}

/// The lifecycle contract of whatever the supervisor runs.
#[async_trait]
pub trait GatewayService: Send {
    /// Gracefully close. `reason` is human-readable; `expected_downtime_ms`
    /// hints how long a restart is expected to take.
    async fn close(&mut self, reason: &str, expected_downtime_ms: Option<u64>) -> Result<()>;
}

pub struct SupervisorOptions {
    /// How long a graceful close may take before the process is terminated.
    pub force_exit_grace: Duration,
    /// Downtime hint passed to `close` on restart.
    pub restart_downtime_hint_ms: u64,
    /// Standing authorization for the privileged restart signal.
    pub allow_privileged_restart: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            force_exit_grace: Duration::from_secs(5),
            restart_downtime_hint_ms: 2_000,
            allow_privileged_restart: false,
        }
    }
}

enum ShutdownKind {
    Stop,
    Restart,
}

pub struct Supervisor {
    lock: RunLock,
    events: mpsc::Receiver<SupervisorEvent>,
    options: SupervisorOptions,
    /// One-shot authorization for the next privileged restart signal.
    privileged_grant: bool,
    state: SupervisorState,
    force_exit: Box<dyn FnMut(i32) + Send>,
}

impl Supervisor {
    pub fn new(
        lock: RunLock,
        events: mpsc::Receiver<SupervisorEvent>,
        options: SupervisorOptions,
    ) -> Self {
        Self {
            lock,
            events,
            options,
            privileged_grant: false,
            state: SupervisorState::Starting,
            force_exit: Box::new(|code| std::process::exit(code)),
        }
    }

    /// Grant a single privileged restart. The grant is consumed by the next
    /// privileged restart signal, authorized or not used.
    pub fn grant_privileged_restart(&mut self) {
        self.privileged_grant = true;
    }

    /// Replace the force-exit action (tests observe it instead of dying).
    pub fn with_force_exit(mut self, hook: impl FnMut(i32) + Send + 'static) -> Self {
        self.force_exit = Box::new(hook);
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Run the start/stop/restart loop until a stop completes. `start` is
    /// invoked once per (re)start; the run lock is held across every restart
    /// and released only when this function returns.
    pub async fn run<S, F, Fut>(mut self, mut start: F) -> Result<()>
    where
        S: GatewayService,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<S>>,
    {
        loop {
            self.state = SupervisorState::Starting;
            info!("Starting gateway");
            let mut service = start().await?;
            self.state = SupervisorState::Running;
            info!("Gateway running");

            let kind = self.wait_for_shutdown_event().await;
            let (reason, downtime) = match kind {
                ShutdownKind::Stop => {
                    self.state = SupervisorState::Stopping;
                    ("gateway stop requested", None)
                }
                ShutdownKind::Restart => {
                    self.state = SupervisorState::Restarting;
                    (
                        "gateway restart requested",
                        Some(self.options.restart_downtime_hint_ms),
                    )
                }
            };
            info!(reason, "Shutting down gateway");

            let timed_out = tokio::select! {
                res = service.close(reason, downtime) => {
                    if let Err(e) = res {
                        // Close errors must not block the restart/stop path.
                        error!(error = %e, "Graceful close reported an error");
                    }
                    false
                }
                _ = tokio::time::sleep(self.options.force_exit_grace) => true,
            };
            if timed_out {
                error!(
                    grace_ms = self.options.force_exit_grace.as_millis() as u64,
                    "Graceful close timed out; force-exiting"
                );
                let _ = self.lock.release();
                (self.force_exit)(1);
                anyhow::bail!("graceful close timed out");
            }

            // Requests that arrived while shutting down are not re-entrant.
            while let Ok(event) = self.events.try_recv() {
                debug!(?event, "Signal received during shutdown ignored");
            }

            match kind {
                ShutdownKind::Restart => {
                    info!("Gateway closed; restarting in-process");
                    continue;
                }
                ShutdownKind::Stop => break,
            }
        }

        self.state = SupervisorState::Stopped;
        self.lock.release()?;
        info!("Gateway stopped");
        Ok(())
    }

    /// Block until an event that warrants a shutdown. Unauthorized privileged
    /// restarts are logged and leave the running instance untouched.
    async fn wait_for_shutdown_event(&mut self) -> ShutdownKind {
        loop {
            match self.events.recv().await {
                // Event source gone: treat as stop.
                None => return ShutdownKind::Stop,
                Some(SupervisorEvent::Stop) => return ShutdownKind::Stop,
                Some(SupervisorEvent::Restart) => return ShutdownKind::Restart,
                Some(SupervisorEvent::PrivilegedRestart) => {
                    let authorized = self.options.allow_privileged_restart
                        || std::mem::take(&mut self.privileged_grant);
                    if authorized {
                        info!("Privileged restart authorized");
                        return ShutdownKind::Restart;
                    }
                    warn!("Unauthorized privileged restart signal ignored");
                }
            }
        }
    }
}

/// Translate OS signals into supervisor events: SIGINT/SIGTERM stop, SIGHUP
/// restarts, SIGUSR2 requests a privileged restart. On non-Unix platforms
/// only Ctrl+C is available. Aborting the returned task uninstalls the
/// handlers.
pub fn spawn_signal_listener(tx: mpsc::Sender<SupervisorEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    return;
                }
            };
            let mut hup = match signal(SignalKind::hangup()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGHUP handler");
                    return;
                }
            };
            let mut usr2 = match signal(SignalKind::user_defined2()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGUSR2 handler");
                    return;
                }
            };
            loop {
                let event = tokio::select! {
                    _ = tokio::signal::ctrl_c() => SupervisorEvent::Stop,
                    _ = term.recv() => SupervisorEvent::Stop,
                    _ = hup.recv() => SupervisorEvent::Restart,
                    _ = usr2.recv() => SupervisorEvent::PrivilegedRestart,
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        }
        #[cfg(not(unix))]
        {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    break;
                }
                if tx.send(SupervisorEvent::Stop).await.is_err() {
                    break;
                }
            }
        }
    })
}

//! The supervised gateway service: wires the cron engine, heartbeat cycle,
//! and the message-bus seam to the agent pipeline.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bus::{InboundMessage, MessageBus};
use crate::config::{self, Config};
use crate::cron::{
    now_ms, CronJob, CronService, ExecutionOutcome, JobExecutor, JobStore, Payload, SessionTarget,
    SessionWaker,
};
use crate::heartbeat::HeartbeatService;
use crate::supervisor::GatewayService;

/// Channel used for payloads that do not name one.
const SYSTEM_CHANNEL: &str = "system";

/// Bridges cron effects onto the message bus: one inbound message per due
/// trigger, plus immediate session wakes.
#[derive(Clone)]
pub struct BusDispatch {
    tx: mpsc::Sender<InboundMessage>,
}

impl BusDispatch {
    pub fn new(tx: mpsc::Sender<InboundMessage>) -> Self {
        Self { tx }
    }

    async fn send(&self, msg: InboundMessage) -> ExecutionOutcome {
        match self.tx.send(msg).await {
            Ok(()) => ExecutionOutcome::ok(),
            Err(e) => ExecutionOutcome::error(format!("message bus closed: {e}")),
        }
    }
}

#[async_trait]
impl JobExecutor for BusDispatch {
    async fn execute(&self, job: &CronJob) -> ExecutionOutcome {
        let msg = match &job.payload {
            Payload::AgentTurn {
                message,
                deliver,
                channel,
                to,
            } => InboundMessage {
                channel: channel.clone().unwrap_or_else(|| SYSTEM_CHANNEL.into()),
                sender_id: "cron".into(),
                chat_id: to.clone().unwrap_or_else(|| job.id.clone()),
                content: message.clone(),
                timestamp: chrono::Utc::now(),
                metadata: json!({
                    "source": "cron",
                    "jobId": job.id,
                    "deliver": deliver,
                    "sessionTarget": job.session_target,
                    "agentId": job.agent_id,
                }),
            },
            Payload::SystemEvent { text } => InboundMessage {
                channel: SYSTEM_CHANNEL.into(),
                sender_id: "cron".into(),
                chat_id: job.id.clone(),
                content: text.clone(),
                timestamp: chrono::Utc::now(),
                metadata: json!({ "source": "cron", "jobId": job.id, "systemEvent": true }),
            },
        };
        self.send(msg).await
    }
}

#[async_trait]
impl SessionWaker for BusDispatch {
    async fn wake_now(&self, target: SessionTarget, agent_id: Option<&str>) {
        let _ = self
            .tx
            .send(InboundMessage {
                channel: SYSTEM_CHANNEL.into(),
                sender_id: "cron".into(),
                chat_id: "wake".into(),
                content: "session wake requested".into(),
                timestamp: chrono::Utc::now(),
                metadata: json!({
                    "source": "wake",
                    "sessionTarget": target,
                    "agentId": agent_id,
                }),
            })
            .await;
    }
}

/// One running gateway instance. Owns the cron service and the background
/// tasks; closed (gracefully) by the supervisor.
pub struct Gateway {
    cron: Arc<CronService>,
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Gateway {
    pub async fn start(cfg: Config) -> Result<Gateway> {
        let profile = cfg.gateway.profile.clone();
        let store_path = config::cron_store_path(&profile);
        let store = JobStore::load(store_path, now_ms())
            .context("Failed to load the cron job store")?;

        let mut bus = MessageBus::new();
        let dispatch = Arc::new(BusDispatch::new(bus.inbound_sender()));
        let cron = Arc::new(CronService::new(
            store,
            Arc::clone(&dispatch) as Arc<dyn JobExecutor>,
            Arc::clone(&dispatch) as Arc<dyn SessionWaker>,
        ));

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        // The agent pipeline lives outside this crate; everything it would
        // consume flows through this receiver.
        let mut inbound_rx = bus
            .take_inbound_receiver()
            .context("Inbound receiver already taken")?;
        let drain_cancel = cancel.child_token();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = drain_cancel.cancelled() => break,
                    msg = inbound_rx.recv() => match msg {
                        Some(msg) => debug!(
                            session = %msg.session_key(),
                            content_len = msg.content.len(),
                            "Inbound message accepted for delivery"
                        ),
                        None => break,
                    },
                }
            }
        }));

        if cfg.cron.enabled {
            tasks.push(cron.spawn_scheduler(cancel.child_token()));
        }
        if cfg.heartbeat.enabled {
            let heartbeat = HeartbeatService::new(
                Arc::clone(&cron),
                Arc::clone(&dispatch) as Arc<dyn SessionWaker>,
                std::time::Duration::from_secs(cfg.heartbeat.interval_secs),
            );
            tasks.push(tokio::spawn(heartbeat.run(cancel.child_token())));
        }

        info!(profile = %profile, "Gateway started");
        Ok(Gateway { cron, cancel, tasks })
    }

    pub fn cron(&self) -> &Arc<CronService> {
        &self.cron
    }
}

#[async_trait]
impl GatewayService for Gateway {
    async fn close(&mut self, reason: &str, expected_downtime_ms: Option<u64>) -> Result<()> {
        info!(reason, expected_downtime_ms, "Closing gateway");
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.cron.persist().await?;
        info!("Gateway closed");
        Ok(())
    }
}

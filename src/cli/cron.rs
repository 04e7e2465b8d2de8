//! Cron command - Manage cron jobs.
//!
//! Subcommands map 1:1 onto the job store operations. They edit the persisted
//! store for the active profile; the running daemon reconciles on its next
//! pass over the file (or on restart).

use anyhow::Result;
use chrono::TimeZone;
use clap::Subcommand;

use crate::config;
use crate::cron::types::{
    PayloadInput, ScheduleDraft, ScheduleInput, SessionTarget, TimestampInput, WakeMode,
};
use crate::cron::{now_ms, CronJob, CronJobCreate, CronJobPatch, JobStore, ListFilter};

#[derive(Subcommand)]
pub enum CronAction {
    /// Show aggregate scheduler state.
    Status,
    /// List jobs, optionally filtered.
    List {
        /// Only enabled (or, with =false, only disabled) jobs.
        #[arg(long)]
        enabled: Option<bool>,
        /// Filter by delivery channel.
        #[arg(long)]
        channel: Option<String>,
        /// Filter by agent id.
        #[arg(long)]
        agent: Option<String>,
    },
    /// Add a new job.
    Add {
        #[arg(long)]
        name: String,
        /// Agent-turn message the job injects.
        #[arg(long, conflicts_with = "system_event")]
        message: Option<String>,
        /// System-event text instead of an agent turn.
        #[arg(long)]
        system_event: Option<String>,
        /// One-shot instant (ISO-8601; offset-less strings are UTC).
        #[arg(long, group = "when")]
        at: Option<String>,
        /// Recurrence period in seconds.
        #[arg(long, group = "when")]
        every: Option<u64>,
        /// 5-field cron expression.
        #[arg(long, group = "when")]
        cron: Option<String>,
        /// IANA timezone for --cron (default UTC).
        #[arg(long)]
        tz: Option<String>,
        /// Delivery channel for the agent turn.
        #[arg(long)]
        channel: Option<String>,
        /// Delivery target (chat/thread id).
        #[arg(long)]
        to: Option<String>,
        /// Deliver the agent's reply to the channel.
        #[arg(long)]
        deliver: bool,
        /// Agent override.
        #[arg(long)]
        agent: Option<String>,
        /// Session target: main or isolated.
        #[arg(long, default_value = "isolated")]
        session: String,
        /// Wake mode: now or next-heartbeat.
        #[arg(long, default_value = "now")]
        wake: String,
        /// Remove the job after a one-shot run.
        #[arg(long)]
        delete_after_run: bool,
    },
    /// Edit an existing job.
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
        #[arg(long, group = "when")]
        at: Option<String>,
        #[arg(long, group = "when")]
        every: Option<u64>,
        #[arg(long, group = "when")]
        cron: Option<String>,
        #[arg(long)]
        tz: Option<String>,
        #[arg(long)]
        message: Option<String>,
    },
    /// Remove a job by ID.
    #[command(alias = "rm")]
    Remove { id: String },
    /// Force a job to run on the daemon's next pass.
    Run { id: String },
}

pub async fn cmd_cron(action: CronAction) -> Result<()> {
    let cfg = config::load_config(None)?;
    let store_path = config::cron_store_path(&cfg.gateway.profile);
    let mut store = JobStore::load(store_path, now_ms())?;

    match action {
        CronAction::Status => {
            let status = store.status();
            println!(
                "{} job(s): {} enabled, {} disabled, {} running",
                status.total, status.enabled, status.disabled, status.running
            );
            for due in &status.next_due {
                println!("  next: [{}] {} at {}", due.id, due.name, fmt_ms(due.next_run_at_ms));
            }
            if let Some(err) = &status.last_error {
                println!("  last error: {err}");
            }
        }
        CronAction::List { enabled, channel, agent } => {
            let filter = ListFilter {
                enabled,
                channel,
                agent_id: agent,
            };
            let jobs = store.list(&filter);
            if jobs.is_empty() {
                println!("No scheduled jobs.");
            } else {
                for job in jobs {
                    print_job(&job);
                }
            }
        }
        CronAction::Add {
            name,
            message,
            system_event,
            at,
            every,
            cron,
            tz,
            channel,
            to,
            deliver,
            agent,
            session,
            wake,
            delete_after_run,
        } => {
            let schedule = build_schedule(at, every, cron, tz)?;
            let payload = match (message, system_event) {
                (Some(message), None) => PayloadInput::AgentTurn {
                    message,
                    deliver,
                    channel,
                    provider: None,
                    to,
                },
                (None, Some(text)) => PayloadInput::SystemEvent { text },
                _ => anyhow::bail!("Provide exactly one of --message or --system-event"),
            };
            let create = CronJobCreate {
                name: Some(name),
                schedule: Some(schedule),
                session_target: Some(parse_session(&session)?),
                wake_mode: Some(parse_wake(&wake)?),
                agent_id: agent.map(Some),
                payload: Some(payload),
                enabled: None,
                delete_after_run: Some(delete_after_run),
            };
            let job = store.add(&create, now_ms())?;
            println!("✓ Added job {}", job.id);
            print_job(&job);
        }
        CronAction::Edit {
            id,
            name,
            enable,
            disable,
            at,
            every,
            cron,
            tz,
            message,
        } => {
            let schedule = if at.is_some() || every.is_some() || cron.is_some() {
                Some(build_schedule(at, every, cron, tz)?)
            } else {
                None
            };
            let patch = CronJobPatch {
                name,
                enabled: match (enable, disable) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
                schedule,
                payload: message.map(|message| PayloadInput::AgentTurn {
                    message,
                    deliver: false,
                    channel: None,
                    provider: None,
                    to: None,
                }),
                ..Default::default()
            };
            let job = store.update(&id, &patch, now_ms())?;
            println!("✓ Updated job {id}");
            print_job(&job);
        }
        CronAction::Remove { id } => {
            if store.remove(&id)? {
                println!("✓ Removed job {id}");
            } else {
                println!("Job {id} not found.");
            }
        }
        CronAction::Run { id } => {
            let job = store.mark_due_now(&id, now_ms())?;
            if job.enabled {
                println!("✓ Job {id} marked due; the daemon runs it on its next pass.");
            } else {
                println!("Job {id} marked due but is disabled; enable it to run.");
            }
        }
    }
    Ok(())
}

fn build_schedule(
    at: Option<String>,
    every: Option<u64>,
    cron: Option<String>,
    tz: Option<String>,
) -> Result<ScheduleInput> {
    let draft = if let Some(at) = at {
        ScheduleDraft::At {
            at_ms: TimestampInput::Iso(at),
        }
    } else if let Some(secs) = every {
        ScheduleDraft::Every {
            every_ms: (secs * 1000) as i64,
            anchor_ms: None,
        }
    } else if let Some(expr) = cron {
        ScheduleDraft::Cron { expr, tz }
    } else {
        anyhow::bail!("Provide --at, --every, or --cron");
    };
    Ok(ScheduleInput::Tagged(draft))
}

fn parse_session(s: &str) -> Result<SessionTarget> {
    match s.to_lowercase().as_str() {
        "main" => Ok(SessionTarget::Main),
        "isolated" => Ok(SessionTarget::Isolated),
        other => anyhow::bail!("Unknown session target \"{other}\" (main | isolated)"),
    }
}

fn parse_wake(s: &str) -> Result<WakeMode> {
    match s.to_lowercase().as_str() {
        "now" => Ok(WakeMode::Now),
        "next-heartbeat" => Ok(WakeMode::NextHeartbeat),
        other => anyhow::bail!("Unknown wake mode \"{other}\" (now | next-heartbeat)"),
    }
}

fn print_job(job: &CronJob) {
    let next = job
        .next_run_at_ms
        .map(fmt_ms)
        .unwrap_or_else(|| "-".into());
    println!(
        "[{}] {} (enabled: {}, runs: {}, next: {})",
        job.id, job.name, job.enabled, job.run_count, next
    );
}

fn fmt_ms(ms: i64) -> String {
    chrono::Utc
        .timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| ms.to_string())
}

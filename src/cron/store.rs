//! Job store — the single owner of all cron job state.
//!
//! All mutation goes through the operations here; the scheduler loop and the
//! service facade never touch job records directly. `next_run_at_ms` is
//! recomputed through the schedule evaluator after every mutating operation
//! and every run completion.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cron::error::{CronError, Result};
use crate::cron::normalize;
use crate::cron::schedule;
use crate::cron::types::{
    CronJob, CronJobCreate, CronJobPatch, CronStore, Payload, RunStatus, Schedule, SessionTarget,
    WakeMode,
};

/// A session wake deferred to the next heartbeat cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWake {
    pub job_id: String,
    pub session_target: SessionTarget,
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub enabled: Option<bool>,
    pub agent_id: Option<String>,
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextDue {
    pub id: String,
    pub name: String,
    pub next_run_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronStatus {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub running: usize,
    pub next_due: Vec<NextDue>,
    pub last_error: Option<String>,
}

/// How many upcoming jobs `status()` reports.
const STATUS_DUE_PREVIEW: usize = 3;

pub struct JobStore {
    path: Option<PathBuf>,
    doc: CronStore,
    /// Execution guards: ids with an in-flight run.
    running: HashSet<String>,
    pending_wakes: Vec<PendingWake>,
    last_error: Option<String>,
}

impl JobStore {
    /// An unpersisted store (tests, embedded use).
    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: CronStore::default(),
            running: HashSet::new(),
            pending_wakes: Vec::new(),
            last_error: None,
        }
    }

    /// Load the store from disk. A missing file is a normal outcome and yields
    /// an empty store. Every record is re-run through the normalizer and the
    /// evaluator so stale or legacy shapes are healed on the way in.
    pub fn load(path: PathBuf, now_ms: i64) -> Result<Self> {
        let mut store = Self {
            path: Some(path.clone()),
            doc: CronStore::default(),
            running: HashSet::new(),
            pending_wakes: Vec::new(),
            last_error: None,
        };
        if !path.exists() {
            return Ok(store);
        }

        let text = std::fs::read_to_string(&path)?;
        let raw: serde_json::Value = serde_json::from_str(&text)?;
        if let Some(version) = raw.get("version").and_then(|v| v.as_u64()) {
            store.doc.version = version as u32;
        }
        for record in raw
            .get("jobs")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
        {
            match Self::heal_record(&record, now_ms) {
                Ok(job) => {
                    debug!(job_id = %job.id, name = %job.name, "Loaded cron job");
                    store.doc.jobs.push(job);
                }
                Err(e) => warn!(error = %e, "Dropping unreadable cron job record"),
            }
        }
        Ok(store)
    }

    /// Rebuild a persisted record through the normalizer, preserving identity
    /// and run history.
    fn heal_record(record: &serde_json::Value, now_ms: i64) -> Result<CronJob> {
        let id = record
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CronError::Normalization("record is missing an id".into()))?
            .to_string();
        let create = normalize::create_from_json_value(record.clone())?;
        let create = normalize::normalize_cron_job_create(&create)?;
        let mut job = Self::materialize(&create, id, now_ms)?;

        job.run_count = record.get("runCount").and_then(|v| v.as_u64()).unwrap_or(0);
        job.last_run_at_ms = record.get("lastRunAtMs").and_then(|v| v.as_i64());
        job.last_status = record
            .get("lastStatus")
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        if let Some(created) = record.get("createdAtMs").and_then(|v| v.as_i64()) {
            job.created_at_ms = created;
        }
        if let Some(updated) = record.get("updatedAtMs").and_then(|v| v.as_i64()) {
            job.updated_at_ms = updated;
        }
        Ok(job)
    }

    /// Write the store document by atomic replace.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.doc)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------------

    pub fn add(&mut self, input: &CronJobCreate, now_ms: i64) -> Result<CronJob> {
        let create = normalize::normalize_cron_job_create(input)?;
        let mut id = new_job_id();
        while self.doc.jobs.iter().any(|j| j.id == id) {
            id = new_job_id();
        }
        let job = Self::materialize(&create, id, now_ms)?;
        self.doc.jobs.push(job.clone());
        self.persist()?;
        Ok(job)
    }

    pub fn update(&mut self, id: &str, patch: &CronJobPatch, now_ms: i64) -> Result<CronJob> {
        let job = self
            .doc
            .jobs
            .iter()
            .find(|j| j.id == id)
            .ok_or_else(|| CronError::UnknownJob(id.to_string()))?;

        // Normalize and validate everything fallible before mutating, so a
        // rejected patch leaves the job untouched.
        let new_name = match &patch.name {
            Some(name) => {
                let trimmed = name.trim();
                if trimmed.is_empty() {
                    return Err(CronError::Normalization("name must not be empty".into()));
                }
                Some(trimmed.to_string())
            }
            None => None,
        };
        let new_schedule = match &patch.schedule {
            Some(input) => {
                let schedule = normalize::normalize_schedule(input)?;
                schedule::validate(&schedule)?;
                Some(schedule)
            }
            None => None,
        };
        let new_payload = match &patch.payload {
            Some(input) => Some(normalize::normalize_payload(input)?),
            None => None,
        };

        let schedule_changed = new_schedule.is_some();
        let enabled_after = patch.enabled.unwrap_or(job.enabled);
        let enabled_changed = enabled_after != job.enabled;
        let schedule_after = new_schedule.clone().unwrap_or_else(|| job.schedule.clone());
        let next_after = if schedule_changed || enabled_changed {
            if enabled_after {
                Some(schedule::compute_next_run_at_ms(&schedule_after, now_ms)?)
            } else {
                None
            }
        } else {
            job.next_run_at_ms
        };

        let job = self
            .doc
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| CronError::UnknownJob(id.to_string()))?;
        if let Some(name) = new_name {
            job.name = name;
        }
        if let Some(schedule) = new_schedule {
            job.schedule = schedule;
        }
        if let Some(payload) = new_payload {
            job.payload = payload;
        }
        if let Some(target) = patch.session_target {
            job.session_target = target;
        }
        if let Some(mode) = patch.wake_mode {
            job.wake_mode = mode;
        }
        if let Some(agent) = &patch.agent_id {
            job.agent_id = normalize::normalize_agent_id(&Some(agent.clone()));
        }
        if let Some(flag) = patch.delete_after_run {
            job.delete_after_run = flag;
        }
        job.enabled = enabled_after;
        job.next_run_at_ms = next_after;
        job.updated_at_ms = now_ms;
        let updated = job.clone();
        self.persist()?;
        Ok(updated)
    }

    /// Remove a job, releasing any pending execution guard. Removing an
    /// unknown id is a no-op reported as `false`.
    pub fn remove(&mut self, id: &str) -> Result<bool> {
        let before = self.doc.jobs.len();
        self.doc.jobs.retain(|j| j.id != id);
        let removed = self.doc.jobs.len() < before;
        if removed {
            self.running.remove(id);
            self.pending_wakes.retain(|w| w.job_id != id);
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<&CronJob> {
        self.doc.jobs.iter().find(|j| j.id == id)
    }

    /// Jobs in insertion order, optionally filtered.
    pub fn list(&self, filter: &ListFilter) -> Vec<CronJob> {
        self.doc
            .jobs
            .iter()
            .filter(|j| filter.enabled.map_or(true, |want| j.enabled == want))
            .filter(|j| {
                filter
                    .agent_id
                    .as_deref()
                    .map_or(true, |want| j.agent_override() == Some(want))
            })
            .filter(|j| {
                filter.channel.as_deref().map_or(true, |want| match &j.payload {
                    Payload::AgentTurn { channel, .. } => channel.as_deref() == Some(want),
                    Payload::SystemEvent { .. } => false,
                })
            })
            .cloned()
            .collect()
    }

    pub fn status(&self) -> CronStatus {
        let enabled = self.doc.jobs.iter().filter(|j| j.enabled).count();
        let mut upcoming: Vec<&CronJob> = self
            .doc
            .jobs
            .iter()
            .filter(|j| j.enabled && j.next_run_at_ms.is_some())
            .collect();
        upcoming.sort_by_key(|j| j.next_run_at_ms);
        CronStatus {
            total: self.doc.jobs.len(),
            enabled,
            disabled: self.doc.jobs.len() - enabled,
            running: self.running.len(),
            next_due: upcoming
                .into_iter()
                .take(STATUS_DUE_PREVIEW)
                .map(|j| NextDue {
                    id: j.id.clone(),
                    name: j.name.clone(),
                    next_run_at_ms: j.next_run_at_ms.unwrap_or_default(),
                })
                .collect(),
            last_error: self.last_error.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Execution bookkeeping
    // -----------------------------------------------------------------------

    /// Collect every enabled, guard-free job with `next_run_at_ms <= now` and
    /// mark each one running. Insertion order is preserved.
    pub fn claim_due(&mut self, now_ms: i64) -> Vec<CronJob> {
        let mut claimed = Vec::new();
        for job in &self.doc.jobs {
            if !job.enabled || self.running.contains(&job.id) {
                continue;
            }
            if job.next_run_at_ms.is_some_and(|next| next <= now_ms) {
                claimed.push(job.clone());
            }
        }
        for job in &claimed {
            self.running.insert(job.id.clone());
        }
        claimed
    }

    /// Acquire the execution guard for a forced run. `Ok(false)` means the job
    /// is already executing (busy).
    pub fn try_claim(&mut self, id: &str) -> Result<bool> {
        if self.get(id).is_none() {
            return Err(CronError::UnknownJob(id.to_string()));
        }
        Ok(self.running.insert(id.to_string()))
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.running.contains(id)
    }

    /// Record a run completion: release the guard unconditionally, update run
    /// state, and either advance the job on its cadence (`reschedule`) or
    /// leave its timetable untouched (out-of-band run). One-shot `at` jobs are
    /// disabled after firing, or removed when `delete_after_run` is set.
    pub fn finish_run(
        &mut self,
        id: &str,
        status: RunStatus,
        detail: Option<String>,
        now_ms: i64,
        reschedule: bool,
    ) -> Result<()> {
        self.running.remove(id);
        let Some(job) = self.doc.jobs.iter_mut().find(|j| j.id == id) else {
            // Removed while executing; nothing left to update.
            return Ok(());
        };

        job.last_run_at_ms = Some(now_ms);
        job.last_status = Some(status);
        job.run_count += 1;
        if status == RunStatus::Error {
            self.last_error = detail;
        } else if job.wake_mode == WakeMode::NextHeartbeat {
            self.pending_wakes.push(PendingWake {
                job_id: job.id.clone(),
                session_target: job.session_target,
                agent_id: job.agent_override().map(str::to_string),
            });
        }

        let mut delete_job = false;
        if reschedule {
            match &job.schedule {
                Schedule::At { .. } => {
                    if job.delete_after_run {
                        delete_job = true;
                    } else {
                        job.enabled = false;
                        job.next_run_at_ms = None;
                    }
                }
                _ => {
                    job.next_run_at_ms = if job.enabled {
                        Some(schedule::compute_next_run_at_ms(&job.schedule, now_ms)?)
                    } else {
                        None
                    };
                }
            }
        }
        if delete_job {
            self.doc.jobs.retain(|j| j.id != id);
        }
        self.persist()
    }

    /// The earliest `next_run_at_ms` across enabled jobs without an in-flight
    /// run — what the scheduler loop sleeps until.
    pub fn next_wake_at(&self) -> Option<i64> {
        self.doc
            .jobs
            .iter()
            .filter(|j| j.enabled && !self.running.contains(&j.id))
            .filter_map(|j| j.next_run_at_ms)
            .min()
    }

    /// Drain wakes deferred to the heartbeat cycle.
    pub fn take_pending_wakes(&mut self) -> Vec<PendingWake> {
        std::mem::take(&mut self.pending_wakes)
    }

    /// Queue a wake for the heartbeat cycle.
    pub fn queue_wake(&mut self, wake: PendingWake) {
        self.pending_wakes.push(wake);
    }

    /// Force a job to be due immediately (used by the CLI; the daemon picks it
    /// up on its next pass).
    pub fn mark_due_now(&mut self, id: &str, now_ms: i64) -> Result<CronJob> {
        let job = self
            .doc
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| CronError::UnknownJob(id.to_string()))?;
        job.next_run_at_ms = Some(now_ms);
        let job = job.clone();
        self.persist()?;
        Ok(job)
    }

    // -----------------------------------------------------------------------

    /// Build a stored job from a normalized creation payload.
    fn materialize(create: &CronJobCreate, id: String, now_ms: i64) -> Result<CronJob> {
        let schedule_input = create
            .schedule
            .as_ref()
            .ok_or_else(|| CronError::Normalization("schedule is required".into()))?;
        let mut schedule = normalize::normalize_schedule(schedule_input)?;
        schedule::validate(&schedule)?;
        // An anchorless interval gets its anchor pinned at creation time.
        if let Schedule::Every { anchor_ms, .. } = &mut schedule {
            if anchor_ms.is_none() {
                *anchor_ms = Some(now_ms);
            }
        }

        let enabled = create.enabled.unwrap_or(true);
        let next_run_at_ms = if enabled {
            Some(schedule::compute_next_run_at_ms(&schedule, now_ms)?)
        } else {
            None
        };
        Ok(CronJob {
            id,
            name: create
                .name
                .clone()
                .ok_or_else(|| CronError::Normalization("name is required".into()))?,
            enabled,
            schedule,
            session_target: create
                .session_target
                .ok_or_else(|| CronError::Normalization("sessionTarget is required".into()))?,
            wake_mode: create
                .wake_mode
                .ok_or_else(|| CronError::Normalization("wakeMode is required".into()))?,
            agent_id: create.agent_id.clone(),
            payload: normalize::normalize_payload(
                create
                    .payload
                    .as_ref()
                    .ok_or_else(|| CronError::Normalization("payload is required".into()))?,
            )?,
            next_run_at_ms,
            last_run_at_ms: None,
            last_status: None,
            run_count: 0,
            delete_after_run: create.delete_after_run.unwrap_or(false),
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        })
    }
}

fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cron::types::{PayloadInput, ScheduleDraft, ScheduleInput, TimestampInput};

    const NOW: i64 = 1_700_000_000_000;

    fn create(schedule: ScheduleInput) -> CronJobCreate {
        CronJobCreate {
            name: Some("job".into()),
            schedule: Some(schedule),
            session_target: Some(SessionTarget::Main),
            wake_mode: Some(WakeMode::NextHeartbeat),
            agent_id: None,
            payload: Some(PayloadInput::SystemEvent { text: "tick".into() }),
            enabled: None,
            delete_after_run: None,
        }
    }

    fn every(ms: i64) -> ScheduleInput {
        ScheduleInput::Tagged(ScheduleDraft::Every {
            every_ms: ms,
            anchor_ms: None,
        })
    }

    fn at(ms: i64) -> ScheduleInput {
        ScheduleInput::Tagged(ScheduleDraft::At {
            at_ms: TimestampInput::Ms(ms),
        })
    }

    #[test]
    fn add_computes_next_run_and_defaults() {
        let mut store = JobStore::in_memory();
        let job = store.add(&create(every(60_000)), NOW).unwrap();
        assert!(job.enabled);
        assert_eq!(job.next_run_at_ms, Some(NOW + 60_000));
        assert_eq!(job.run_count, 0);
        assert_eq!(job.last_status, None);
        // The anchor was pinned at creation time.
        assert_eq!(
            job.schedule,
            Schedule::Every {
                every_ms: 60_000,
                anchor_ms: Some(NOW)
            }
        );
    }

    #[test]
    fn add_rejects_invalid_schedule_without_storing() {
        let mut store = JobStore::in_memory();
        let bad = create(ScheduleInput::Tagged(ScheduleDraft::Cron {
            expr: "not a cron".into(),
            tz: None,
        }));
        assert!(matches!(
            store.add(&bad, NOW),
            Err(CronError::InvalidSchedule(_))
        ));
        assert!(store.list(&ListFilter::default()).is_empty());
    }

    #[test]
    fn update_unknown_id_fails() {
        let mut store = JobStore::in_memory();
        assert!(matches!(
            store.update("nope", &CronJobPatch::default(), NOW),
            Err(CronError::UnknownJob(_))
        ));
    }

    #[test]
    fn update_schedule_recomputes_next_run() {
        let mut store = JobStore::in_memory();
        let job = store.add(&create(every(60_000)), NOW).unwrap();
        let patch = CronJobPatch {
            schedule: Some(every(10_000)),
            ..Default::default()
        };
        let updated = store.update(&job.id, &patch, NOW + 5).unwrap();
        assert_eq!(updated.next_run_at_ms, Some(NOW + 5 + 10_000));
    }

    #[test]
    fn disable_clears_next_and_enable_recomputes() {
        let mut store = JobStore::in_memory();
        let job = store.add(&create(every(60_000)), NOW).unwrap();

        let off = store
            .update(
                &job.id,
                &CronJobPatch {
                    enabled: Some(false),
                    ..Default::default()
                },
                NOW,
            )
            .unwrap();
        assert_eq!(off.next_run_at_ms, None);

        let on = store
            .update(
                &job.id,
                &CronJobPatch {
                    enabled: Some(true),
                    ..Default::default()
                },
                NOW + 1_000,
            )
            .unwrap();
        assert!(on.next_run_at_ms.is_some());
    }

    #[test]
    fn rejected_patch_leaves_job_untouched() {
        let mut store = JobStore::in_memory();
        let job = store.add(&create(every(60_000)), NOW).unwrap();
        let patch = CronJobPatch {
            name: Some("renamed".into()),
            schedule: Some(ScheduleInput::Tagged(ScheduleDraft::Every {
                every_ms: -1,
                anchor_ms: None,
            })),
            ..Default::default()
        };
        assert!(store.update(&job.id, &patch, NOW).is_err());
        let unchanged = store.get(&job.id).unwrap();
        assert_eq!(unchanged.name, "job");
        assert_eq!(unchanged.next_run_at_ms, job.next_run_at_ms);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut store = JobStore::in_memory();
        let job = store.add(&create(every(60_000)), NOW).unwrap();
        assert!(store.remove(&job.id).unwrap());
        assert!(!store.remove(&job.id).unwrap());
    }

    #[test]
    fn list_preserves_insertion_order_and_filters() {
        let mut store = JobStore::in_memory();
        let a = store.add(&create(every(1_000)), NOW).unwrap();
        let b = store.add(&create(every(2_000)), NOW).unwrap();
        store
            .update(
                &b.id,
                &CronJobPatch {
                    enabled: Some(false),
                    ..Default::default()
                },
                NOW,
            )
            .unwrap();

        let all = store.list(&ListFilter::default());
        assert_eq!(
            all.iter().map(|j| j.id.as_str()).collect::<Vec<_>>(),
            vec![a.id.as_str(), b.id.as_str()]
        );

        let enabled_only = store.list(&ListFilter {
            enabled: Some(true),
            ..Default::default()
        });
        assert_eq!(enabled_only.len(), 1);
        assert_eq!(enabled_only[0].id, a.id);
    }

    #[test]
    fn list_filters_by_channel_and_agent() {
        let mut store = JobStore::in_memory();
        let mut input = create(every(1_000));
        input.payload = Some(PayloadInput::AgentTurn {
            message: "hi".into(),
            deliver: true,
            channel: None,
            provider: Some("Telegram".into()),
            to: None,
        });
        input.agent_id = Some(Some(" Ops ".into()));
        let job = store.add(&input, NOW).unwrap();
        store.add(&create(every(1_000)), NOW).unwrap();

        let by_channel = store.list(&ListFilter {
            channel: Some("telegram".into()),
            ..Default::default()
        });
        assert_eq!(by_channel.len(), 1);
        assert_eq!(by_channel[0].id, job.id);

        let by_agent = store.list(&ListFilter {
            agent_id: Some("ops".into()),
            ..Default::default()
        });
        assert_eq!(by_agent.len(), 1);
        assert_eq!(by_agent[0].id, job.id);
    }

    #[test]
    fn claim_due_respects_guard_and_enabled() {
        let mut store = JobStore::in_memory();
        let due = store.add(&create(at(NOW - 10)), NOW - 100).unwrap();
        let future = store.add(&create(at(NOW + 60_000)), NOW - 100).unwrap();

        let claimed = store.claim_due(NOW);
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, due.id);
        assert!(store.is_running(&due.id));

        // A second pass does not double-claim the running job.
        assert!(store.claim_due(NOW).is_empty());
        assert!(!store.is_running(&future.id));
    }

    #[test]
    fn try_claim_reports_busy_and_unknown() {
        let mut store = JobStore::in_memory();
        let job = store.add(&create(every(60_000)), NOW).unwrap();
        assert!(store.try_claim(&job.id).unwrap());
        assert!(!store.try_claim(&job.id).unwrap());
        assert!(matches!(
            store.try_claim("ghost"),
            Err(CronError::UnknownJob(_))
        ));
    }

    #[test]
    fn finish_run_reschedules_recurring_jobs() {
        let mut store = JobStore::in_memory();
        let job = store.add(&create(every(30_000)), NOW).unwrap();
        assert!(store.try_claim(&job.id).unwrap());

        store
            .finish_run(&job.id, RunStatus::Ok, None, NOW + 31_000, true)
            .unwrap();
        let job = store.get(&job.id).unwrap().clone();
        assert!(!store.is_running(&job.id));
        assert_eq!(job.run_count, 1);
        assert_eq!(job.last_status, Some(RunStatus::Ok));
        // Back on the anchored grid, strictly after "now".
        assert_eq!(job.next_run_at_ms, Some(NOW + 60_000));
    }

    #[test]
    fn finish_run_disables_one_shot_jobs() {
        let mut store = JobStore::in_memory();
        let job = store.add(&create(at(NOW + 10)), NOW).unwrap();
        assert!(store.try_claim(&job.id).unwrap());
        store
            .finish_run(&job.id, RunStatus::Ok, None, NOW + 20, true)
            .unwrap();
        let job = store.get(&job.id).unwrap();
        assert!(!job.enabled);
        assert_eq!(job.next_run_at_ms, None);
        assert_eq!(job.run_count, 1);
    }

    #[test]
    fn finish_run_deletes_one_shot_when_flagged() {
        let mut store = JobStore::in_memory();
        let mut input = create(at(NOW + 10));
        input.delete_after_run = Some(true);
        let job = store.add(&input, NOW).unwrap();
        assert!(store.try_claim(&job.id).unwrap());
        store
            .finish_run(&job.id, RunStatus::Ok, None, NOW + 20, true)
            .unwrap();
        assert!(store.get(&job.id).is_none());
    }

    #[test]
    fn finish_run_records_error_and_keeps_job_enabled() {
        let mut store = JobStore::in_memory();
        let job = store.add(&create(every(30_000)), NOW).unwrap();
        assert!(store.try_claim(&job.id).unwrap());
        store
            .finish_run(
                &job.id,
                RunStatus::Error,
                Some("bus closed".into()),
                NOW + 1_000,
                true,
            )
            .unwrap();
        let job = store.get(&job.id).unwrap();
        assert!(job.enabled);
        assert_eq!(job.last_status, Some(RunStatus::Error));
        assert!(job.next_run_at_ms.is_some());
        assert_eq!(store.status().last_error.as_deref(), Some("bus closed"));
    }

    #[test]
    fn out_of_band_run_leaves_timetable_untouched() {
        let mut store = JobStore::in_memory();
        let job = store.add(&create(every(30_000)), NOW).unwrap();
        let planned = job.next_run_at_ms;
        assert!(store.try_claim(&job.id).unwrap());
        store
            .finish_run(&job.id, RunStatus::Ok, None, NOW + 5_000, false)
            .unwrap();
        let job = store.get(&job.id).unwrap();
        assert_eq!(job.next_run_at_ms, planned);
        assert_eq!(job.run_count, 1);
    }

    #[test]
    fn successful_heartbeat_job_queues_a_pending_wake() {
        let mut store = JobStore::in_memory();
        let job = store.add(&create(every(30_000)), NOW).unwrap();
        assert!(store.try_claim(&job.id).unwrap());
        store
            .finish_run(&job.id, RunStatus::Ok, None, NOW + 1, true)
            .unwrap();

        let wakes = store.take_pending_wakes();
        assert_eq!(wakes.len(), 1);
        assert_eq!(wakes[0].job_id, job.id);
        assert!(store.take_pending_wakes().is_empty());
    }

    #[test]
    fn next_wake_at_skips_running_and_disabled_jobs() {
        let mut store = JobStore::in_memory();
        let soon = store.add(&create(at(NOW + 1_000)), NOW).unwrap();
        let later = store.add(&create(at(NOW + 60_000)), NOW).unwrap();
        assert_eq!(store.next_wake_at(), Some(NOW + 1_000));

        assert!(store.try_claim(&soon.id).unwrap());
        assert_eq!(store.next_wake_at(), Some(NOW + 60_000));

        store
            .update(
                &later.id,
                &CronJobPatch {
                    enabled: Some(false),
                    ..Default::default()
                },
                NOW,
            )
            .unwrap();
        assert_eq!(store.next_wake_at(), None);
    }

    #[test]
    fn persist_and_reload_heals_legacy_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        // A legacy record: provider instead of channel, at shorthand, stale
        // nextRunAtMs.
        std::fs::write(
            &path,
            serde_json::json!({
                "version": 1,
                "jobs": [{
                    "id": "legacy01",
                    "name": "old-style",
                    "schedule": {"at": "2099-01-01T00:00:00"},
                    "sessionTarget": "isolated",
                    "wakeMode": "next-heartbeat",
                    "agentId": null,
                    "payload": {"kind": "agentTurn", "message": "hi", "provider": " SLACK "},
                    "nextRunAtMs": 1,
                    "runCount": 7
                }]
            })
            .to_string(),
        )
        .unwrap();

        let store = JobStore::load(path.clone(), NOW).unwrap();
        let job = store.get("legacy01").unwrap();
        assert_eq!(job.agent_id, Some(None));
        assert_eq!(job.run_count, 7);
        match &job.payload {
            Payload::AgentTurn { channel, .. } => assert_eq!(channel.as_deref(), Some("slack")),
            _ => panic!("expected agentTurn"),
        }
        let expected = chrono::DateTime::parse_from_rfc3339("2099-01-01T00:00:00Z")
            .unwrap()
            .timestamp_millis();
        assert_eq!(job.next_run_at_ms, Some(expected));
    }

    #[test]
    fn store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");

        let mut store = JobStore::load(path.clone(), NOW).unwrap();
        let job = store.add(&create(every(60_000)), NOW).unwrap();
        drop(store);

        let reloaded = JobStore::load(path, NOW + 10).unwrap();
        let loaded = reloaded.get(&job.id).unwrap();
        assert_eq!(loaded.name, job.name);
        // The evaluator re-ran on load: same anchored grid.
        assert_eq!(loaded.next_run_at_ms, Some(NOW + 60_000));
    }

    #[test]
    fn status_reports_counts_and_upcoming() {
        let mut store = JobStore::in_memory();
        store.add(&create(at(NOW + 3_000)), NOW).unwrap();
        store.add(&create(at(NOW + 1_000)), NOW).unwrap();
        let off = store.add(&create(at(NOW + 2_000)), NOW).unwrap();
        store
            .update(
                &off.id,
                &CronJobPatch {
                    enabled: Some(false),
                    ..Default::default()
                },
                NOW,
            )
            .unwrap();

        let status = store.status();
        assert_eq!(status.total, 3);
        assert_eq!(status.enabled, 2);
        assert_eq!(status.disabled, 1);
        assert_eq!(status.next_due.len(), 2);
        assert_eq!(status.next_due[0].next_run_at_ms, NOW + 1_000);
    }
}

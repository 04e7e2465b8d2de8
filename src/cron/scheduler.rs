//! Scheduler loop — a single cooperative timer over the job store.
//!
//! The loop sleeps until the earliest `next_run_at_ms` across enabled jobs,
//! or until a store mutation wakes it early, then dispatches every due job
//! fire-and-forget so a slow job never delays the others.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cron::store::JobStore;
use crate::cron::types::{CronJob, RunStatus, SessionTarget, WakeMode};
use crate::cron::now_ms;

pub type SharedStore = Arc<Mutex<JobStore>>;

/// Result of one executor invocation.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: RunStatus,
    pub detail: Option<String>,
}

impl ExecutionOutcome {
    pub fn ok() -> Self {
        Self {
            status: RunStatus::Ok,
            detail: None,
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Error,
            detail: Some(detail.into()),
        }
    }
}

/// The injected capability that performs a job's effect. Invoked once per due
/// trigger; must not block the loop.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &CronJob) -> ExecutionOutcome;
}

/// Session/heartbeat interface: immediate wake-up of a target session.
#[async_trait]
pub trait SessionWaker: Send + Sync {
    async fn wake_now(&self, target: SessionTarget, agent_id: Option<&str>);
}

/// How a forced run interacts with the job's normal cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// The forced run counts as a regular firing: the job is rescheduled.
    Reschedule,
    /// Out-of-band trigger: the timetable is left untouched.
    OutOfBand,
}

/// Result of a forced-run request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Started,
    /// The job already has an in-flight run.
    Busy,
}

pub struct Scheduler {
    store: SharedStore,
    notify: Arc<Notify>,
    executor: Arc<dyn JobExecutor>,
    waker: Arc<dyn SessionWaker>,
}

impl Scheduler {
    pub fn new(
        store: SharedStore,
        notify: Arc<Notify>,
        executor: Arc<dyn JobExecutor>,
        waker: Arc<dyn SessionWaker>,
    ) -> Self {
        Self {
            store,
            notify,
            executor,
            waker,
        }
    }

    /// Run until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!("Cron scheduler started");
        loop {
            let now = now_ms();
            let due = self.store.lock().await.claim_due(now);
            for job in due {
                debug!(job_id = %job.id, name = %job.name, "Job due");
                spawn_job_run(
                    Arc::clone(&self.store),
                    Arc::clone(&self.notify),
                    Arc::clone(&self.executor),
                    Arc::clone(&self.waker),
                    job,
                    true,
                );
            }

            let next = self.store.lock().await.next_wake_at();
            let sleep = async {
                match next {
                    Some(deadline) => {
                        let delta = (deadline - now_ms()).max(0) as u64;
                        tokio::time::sleep(Duration::from_millis(delta)).await;
                    }
                    // Nothing scheduled; wait for a store mutation.
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.notify.notified() => {}
                _ = sleep => {}
            }
        }
        info!("Cron scheduler stopped");
    }
}

/// Dispatch one run fire-and-forget: execute, record the completion, signal
/// the session per the job's wake mode, and wake the loop so it can re-read
/// the minimum due time.
pub(crate) fn spawn_job_run(
    store: SharedStore,
    notify: Arc<Notify>,
    executor: Arc<dyn JobExecutor>,
    waker: Arc<dyn SessionWaker>,
    job: CronJob,
    reschedule: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(job_id = %job.id, name = %job.name, "Executing cron job");
        let outcome = executor.execute(&job).await;
        if outcome.status == RunStatus::Error {
            warn!(
                job_id = %job.id,
                detail = outcome.detail.as_deref().unwrap_or("unknown"),
                "Cron job execution failed"
            );
        }

        let result = store.lock().await.finish_run(
            &job.id,
            outcome.status,
            outcome.detail,
            now_ms(),
            reschedule,
        );
        if let Err(e) = result {
            error!(job_id = %job.id, error = %e, "Failed to record cron job completion");
        }

        if outcome.status == RunStatus::Ok && job.wake_mode == WakeMode::Now {
            waker
                .wake_now(job.session_target, job.agent_override())
                .await;
        }
        notify.notify_one();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cron::types::{
        CronJobCreate, PayloadInput, ScheduleDraft, ScheduleInput, TimestampInput,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExecutor {
        calls: AtomicUsize,
        delay: Duration,
        outcome_status: RunStatus,
    }

    impl CountingExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                outcome_status: RunStatus::Ok,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                outcome_status: RunStatus::Ok,
            })
        }
    }

    #[async_trait]
    impl JobExecutor for CountingExecutor {
        async fn execute(&self, _job: &CronJob) -> ExecutionOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.outcome_status {
                RunStatus::Ok => ExecutionOutcome::ok(),
                RunStatus::Error => ExecutionOutcome::error("boom"),
            }
        }
    }

    struct RecordingWaker {
        wakes: AtomicUsize,
    }

    #[async_trait]
    impl SessionWaker for RecordingWaker {
        async fn wake_now(&self, _target: SessionTarget, _agent_id: Option<&str>) {
            self.wakes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wake_recorder() -> Arc<RecordingWaker> {
        Arc::new(RecordingWaker {
            wakes: AtomicUsize::new(0),
        })
    }

    fn due_soon_create(wake_mode: WakeMode) -> CronJobCreate {
        CronJobCreate {
            name: Some("tick".into()),
            schedule: Some(ScheduleInput::Tagged(ScheduleDraft::At {
                at_ms: TimestampInput::Ms(now_ms() + 50),
            })),
            session_target: Some(SessionTarget::Main),
            wake_mode: Some(wake_mode),
            agent_id: None,
            payload: Some(PayloadInput::SystemEvent { text: "t".into() }),
            enabled: None,
            delete_after_run: None,
        }
    }

    fn shared_store() -> SharedStore {
        Arc::new(Mutex::new(JobStore::in_memory()))
    }

    #[tokio::test]
    async fn due_job_is_dispatched_and_one_shot_disabled() {
        let store = shared_store();
        let notify = Arc::new(Notify::new());
        let executor = CountingExecutor::new();
        let waker = wake_recorder();

        let job = store
            .lock()
            .await
            .add(&due_soon_create(WakeMode::Now), now_ms())
            .unwrap();

        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&notify),
            executor.clone(),
            waker.clone(),
        );
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(400)).await;
        cancel.cancel();
        let _ = handle.await;

        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(waker.wakes.load(Ordering::SeqCst), 1);
        let stored = store.lock().await.get(&job.id).cloned().unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.run_count, 1);
    }

    #[tokio::test]
    async fn slow_job_does_not_delay_others() {
        let store = shared_store();
        let notify = Arc::new(Notify::new());
        let executor = CountingExecutor::slow(Duration::from_secs(30));
        let waker = wake_recorder();

        store
            .lock()
            .await
            .add(&due_soon_create(WakeMode::NextHeartbeat), now_ms())
            .unwrap();
        store
            .lock()
            .await
            .add(&due_soon_create(WakeMode::NextHeartbeat), now_ms())
            .unwrap();

        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&notify),
            executor.clone(),
            waker.clone(),
        );
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        // Both jobs start even though neither run has finished.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

        cancel.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn store_mutation_wakes_the_loop_early() {
        let store = shared_store();
        let notify = Arc::new(Notify::new());
        let executor = CountingExecutor::new();
        let waker = wake_recorder();

        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&notify),
            executor.clone(),
            waker.clone(),
        );
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        // The loop is parked with nothing scheduled; adding a due-soon job and
        // notifying must get it dispatched without any deadline to wake on.
        tokio::time::sleep(Duration::from_millis(50)).await;
        store
            .lock()
            .await
            .add(&due_soon_create(WakeMode::NextHeartbeat), now_ms())
            .unwrap();
        notify.notify_one();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

        cancel.cancel();
        let _ = handle.await;
    }
}

//! Cron service — the gateway-facing facade over the job store and the
//! scheduler loop.

use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::cron::error::Result;
use crate::cron::scheduler::{
    spawn_job_run, JobExecutor, RunMode, RunOutcome, Scheduler, SessionWaker, SharedStore,
};
use crate::cron::store::{CronStatus, JobStore, ListFilter, PendingWake};
use crate::cron::types::{CronJob, CronJobCreate, CronJobPatch, WakeMode};
use crate::cron::now_ms;

pub struct CronService {
    store: SharedStore,
    notify: Arc<Notify>,
    executor: Arc<dyn JobExecutor>,
    waker: Arc<dyn SessionWaker>,
}

impl CronService {
    pub fn new(
        store: JobStore,
        executor: Arc<dyn JobExecutor>,
        waker: Arc<dyn SessionWaker>,
    ) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            notify: Arc::new(Notify::new()),
            executor,
            waker,
        }
    }

    /// Spawn the scheduler loop; it runs until the token is cancelled.
    pub fn spawn_scheduler(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let scheduler = Scheduler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.notify),
            Arc::clone(&self.executor),
            Arc::clone(&self.waker),
        );
        tokio::spawn(scheduler.run(cancel))
    }

    pub async fn add(&self, input: &CronJobCreate) -> Result<CronJob> {
        let job = self.store.lock().await.add(input, now_ms())?;
        self.notify.notify_one();
        Ok(job)
    }

    pub async fn update(&self, id: &str, patch: &CronJobPatch) -> Result<CronJob> {
        let job = self.store.lock().await.update(id, patch, now_ms())?;
        self.notify.notify_one();
        Ok(job)
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        let removed = self.store.lock().await.remove(id)?;
        if removed {
            self.notify.notify_one();
        }
        Ok(removed)
    }

    pub async fn get(&self, id: &str) -> Option<CronJob> {
        self.store.lock().await.get(id).cloned()
    }

    pub async fn list(&self, filter: &ListFilter) -> Vec<CronJob> {
        self.store.lock().await.list(filter)
    }

    pub async fn status(&self) -> CronStatus {
        self.store.lock().await.status()
    }

    /// Force-execute a job immediately, regardless of its timetable. A job
    /// with an in-flight run is reported busy rather than double-dispatched.
    pub async fn run_now(&self, id: &str, mode: RunMode) -> Result<RunOutcome> {
        let job = {
            let mut store = self.store.lock().await;
            if !store.try_claim(id)? {
                return Ok(RunOutcome::Busy);
            }
            // try_claim verified existence.
            match store.get(id) {
                Some(job) => job.clone(),
                None => return Ok(RunOutcome::Busy),
            }
        };
        spawn_job_run(
            Arc::clone(&self.store),
            Arc::clone(&self.notify),
            Arc::clone(&self.executor),
            Arc::clone(&self.waker),
            job,
            mode == RunMode::Reschedule,
        );
        Ok(RunOutcome::Started)
    }

    /// Signal sessions for jobs matching the filter: `wake_mode = now` jobs
    /// wake their session immediately, `next-heartbeat` jobs are queued for
    /// the heartbeat cycle. Returns how many jobs were signaled.
    pub async fn wake_now(&self, filter: &ListFilter) -> usize {
        let jobs = self.list(filter).await;
        let mut signaled = 0;
        for job in jobs {
            match job.wake_mode {
                WakeMode::Now => {
                    self.waker
                        .wake_now(job.session_target, job.agent_override())
                        .await;
                }
                WakeMode::NextHeartbeat => {
                    let mut store = self.store.lock().await;
                    store.queue_wake(PendingWake {
                        job_id: job.id.clone(),
                        session_target: job.session_target,
                        agent_id: job.agent_override().map(str::to_string),
                    });
                }
            }
            signaled += 1;
        }
        signaled
    }

    /// Drain wakes deferred to the heartbeat cycle.
    pub async fn take_pending_wakes(&self) -> Vec<PendingWake> {
        self.store.lock().await.take_pending_wakes()
    }

    /// Flush the store to disk.
    pub async fn persist(&self) -> Result<()> {
        self.store.lock().await.persist()
    }
}

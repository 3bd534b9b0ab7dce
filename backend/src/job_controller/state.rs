//! Shared state of long-running background jobs.
//!
//! Scan ingestion runs outside the request/response cycle. Its handler
//! registers a job id here, the worker reports through the channel, and clients
//! poll `/api/scans/status/{job_id}`.
//!
//! - `JobsState`: clonable handle injected into the Actix app in `main.rs`.
//! - `JobUpdate`: one status change sent by a worker.
//! - `start_job_updater`: the single task that applies updates to the map.
//!
//! Finished jobs are kept for `ttl` after they finish and pruned on the next
//! registration.

use common::jobs::JobStatus;
use log::debug;
use std::time::{Duration, Instant};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{mpsc, RwLock};

const UPDATE_CHANNEL_CAPACITY: usize = 100;
const DEFAULT_JOB_TTL: Duration = Duration::from_secs(3600);

#[derive(Clone, Debug)]
pub struct TrackedJob {
    pub status: JobStatus,
    pub finished_at: Option<Instant>,
}

impl TrackedJob {
    fn new(status: JobStatus) -> Self {
        let finished_at = status.is_finished().then(Instant::now);
        Self { status, finished_at }
    }

    fn expired(&self, ttl: Duration) -> bool {
        self.finished_at.is_some_and(|at| at.elapsed() >= ttl)
    }
}

#[derive(Clone)]
pub struct JobsState {
    /// Job id to its latest status. Read by the status endpoint, written only by
    /// `start_job_updater` once a job is registered.
    pub jobs: Arc<RwLock<HashMap<String, TrackedJob>>>,

    /// Workers push `JobUpdate`s here instead of locking `jobs` themselves.
    pub tx: mpsc::Sender<JobUpdate>,

    pub ttl: Duration,
}

impl JobsState {
    /// Fresh state and the receiver to hand to `start_job_updater`.
    pub fn new() -> (Self, mpsc::Receiver<JobUpdate>) {
        Self::with_ttl(DEFAULT_JOB_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> (Self, mpsc::Receiver<JobUpdate>) {
        let (tx, rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let state = Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            tx,
            ttl,
        };
        (state, rx)
    }

    pub async fn register(&self, job_id: &str) {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !job.expired(self.ttl));
        if jobs.len() < before {
            debug!("Evicted {} finished jobs", before - jobs.len());
        }
        jobs.insert(job_id.to_string(), TrackedJob::new(JobStatus::Pending));
    }

    pub async fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs.read().await.get(job_id).map(|job| job.status.clone())
    }
}

#[derive(Debug)]
pub struct JobUpdate {
    pub(crate) job_id: String,
    pub(crate) status: JobStatus,
}

/// Applies worker updates to the shared map until every sender is gone. A
/// finished job keeps its final status; late progress messages are dropped.
pub async fn start_job_updater(state: JobsState, mut rx: mpsc::Receiver<JobUpdate>) {
    while let Some(update) = rx.recv().await {
        let mut jobs = state.jobs.write().await;
        let finished = jobs
            .get(&update.job_id)
            .is_some_and(|job| job.status.is_finished());
        if !finished {
            jobs.insert(update.job_id, TrackedJob::new(update.status));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn final_status_is_not_overwritten_by_late_progress() {
        let (state, rx) = JobsState::new();
        state.register("job-1").await;
        // The updater's copy must not keep the real channel open.
        let (detached_tx, _detached_rx) = mpsc::channel(1);
        let updater = tokio::spawn(start_job_updater(
            JobsState {
                jobs: state.jobs.clone(),
                tx: detached_tx,
                ttl: state.ttl,
            },
            rx,
        ));

        for status in [
            JobStatus::InProgress(50),
            JobStatus::Completed("done".into()),
            JobStatus::InProgress(90),
        ] {
            state
                .tx
                .send(JobUpdate {
                    job_id: "job-1".into(),
                    status,
                })
                .await
                .unwrap();
        }
        let JobsState { jobs, tx, .. } = state;
        drop(tx);
        updater.await.unwrap();

        let jobs = jobs.read().await;
        let job = jobs.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Completed("done".into()));
        assert!(job.finished_at.is_some());
    }

    #[tokio::test]
    async fn finished_jobs_expire_on_the_next_registration() {
        let (state, _rx) = JobsState::with_ttl(Duration::ZERO);
        state.register("done").await;
        state.register("running").await;
        {
            let mut jobs = state.jobs.write().await;
            jobs.insert("done".into(), TrackedJob::new(JobStatus::Failed("gone".into())));
            jobs.insert("running".into(), TrackedJob::new(JobStatus::InProgress(10)));
        }
        assert!(state.status("done").await.is_some());

        state.register("next").await;

        assert_eq!(state.status("done").await, None);
        assert_eq!(state.status("running").await, Some(JobStatus::InProgress(10)));
        assert_eq!(state.status("next").await, Some(JobStatus::Pending));
    }

    #[tokio::test]
    async fn finished_jobs_stay_within_their_ttl() {
        let (state, _rx) = JobsState::with_ttl(Duration::from_secs(3600));
        state.register("done").await;
        state
            .jobs
            .write()
            .await
            .insert("done".into(), TrackedJob::new(JobStatus::Completed("ok".into())));
        state.register("next").await;
        assert_eq!(state.status("done").await, Some(JobStatus::Completed("ok".into())));
    }
}

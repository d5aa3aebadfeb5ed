//! Benchmark job coordination.
//!
//! One queue per portal process. A team gets at most one live (pending or
//! running) job, workers pull in FIFO order, and each job is handed to
//! exactly one worker. Every operation takes the single store lock, so
//! enqueue, dequeue, and complete on a given job linearize.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Done,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Not a fault: the front end shows this to the user as a notice.
    #[error("job already queued for team {team_id}")]
    AlreadyQueued { team_id: i64 },
    #[error("unknown job {job_id}")]
    UnknownJob { job_id: i64 },
}

/// A dequeued job as handed to a worker. `urls` is attached by the portal
/// layer, which owns the team target registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescription {
    pub job_id: i64,
    pub team_id: i64,
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Result a worker reports back. `output` is opaque here; the external
/// result store interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: i64,
    pub score: i64,
    pub pass: bool,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub output: serde_json::Value,
}

#[derive(Debug)]
struct JobRecord {
    team_id: i64,
    state: JobState,
    bench_node: Option<String>,
    enqueued_at: DateTime<Utc>,
    result: Option<JobResult>,
}

#[derive(Debug, Default)]
struct QueueInner {
    next_id: i64,
    jobs: HashMap<i64, JobRecord>,
    pending: VecDeque<i64>,
}

/// In-memory job store. Results live here only until the external store
/// collects them; nothing is persisted.
#[derive(Debug, Default)]
pub struct JobQueue {
    inner: Mutex<QueueInner>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pending job for `team_id`.
    ///
    /// While the team still has a pending or running job, exactly one of
    /// any number of concurrent attempts succeeds; the rest are rejected
    /// with [`QueueError::AlreadyQueued`].
    pub fn enqueue(&self, team_id: i64) -> Result<i64, QueueError> {
        let mut inner = self.lock();
        let live = inner
            .jobs
            .values()
            .any(|job| job.team_id == team_id && job.state != JobState::Done);
        if live {
            return Err(QueueError::AlreadyQueued { team_id });
        }
        inner.next_id += 1;
        let job_id = inner.next_id;
        inner.jobs.insert(
            job_id,
            JobRecord {
                team_id,
                state: JobState::Pending,
                bench_node: None,
                enqueued_at: Utc::now(),
                result: None,
            },
        );
        inner.pending.push_back(job_id);
        Ok(job_id)
    }

    /// Pull the oldest pending job for `bench_node`. `None` means the queue
    /// is empty right now; workers poll again later rather than block.
    pub fn dequeue(&self, bench_node: &str) -> Option<JobDescription> {
        let mut inner = self.lock();
        let job_id = inner.pending.pop_front()?;
        let record = inner.jobs.get_mut(&job_id)?;
        record.state = JobState::Running;
        record.bench_node = Some(bench_node.to_owned());
        Some(JobDescription {
            job_id,
            team_id: record.team_id,
            urls: Vec::new(),
        })
    }

    /// Store a worker's result and mark the job done, unblocking status
    /// inquiries for it.
    pub fn complete(&self, result: JobResult) -> Result<(), QueueError> {
        let mut inner = self.lock();
        let record = inner
            .jobs
            .get_mut(&result.job_id)
            .ok_or(QueueError::UnknownJob {
                job_id: result.job_id,
            })?;
        record.state = JobState::Done;
        record.result = Some(result);
        Ok(())
    }

    pub fn state(&self, job_id: i64) -> Option<JobState> {
        self.lock().jobs.get(&job_id).map(|record| record.state)
    }

    pub fn result(&self, job_id: i64) -> Option<JobResult> {
        self.lock()
            .jobs
            .get(&job_id)
            .and_then(|record| record.result.clone())
    }

    /// The worker a job was handed to, once it has been dequeued.
    pub fn assignment(&self, job_id: i64) -> Option<String> {
        self.lock()
            .jobs
            .get(&job_id)
            .and_then(|record| record.bench_node.clone())
    }

    /// Age of the oldest pending job, for queue health monitoring.
    pub fn oldest_pending_age(&self) -> Option<chrono::Duration> {
        let inner = self.lock();
        let job_id = inner.pending.front()?;
        let record = inner.jobs.get(job_id)?;
        Some(Utc::now().signed_duration_since(record.enqueued_at))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

//! Job Queue actor — owns the laned backlog and all job state

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::healing::HealingHandle;
use crate::storage::SnapshotStore;
use crate::types::{Job, JobPriority, JobStatus, DEFAULT_MAX_RETRIES};

/// Snapshot namespace in the snapshot store
const SNAPSHOT_NAMESPACE: &str = "job-queue";

/// Command channel depth
const COMMAND_BUFFER: usize = 256;

// ============================================================================
// Errors
// ============================================================================

/// Job Queue operation errors
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job queue unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// Commands
// ============================================================================

/// Enqueue parameters shared by `enqueue` and `schedule`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub job_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: JobPriority,
    pub max_retries: Option<u32>,
    /// Future eligibility timestamp (set by `schedule`)
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Commands for the JobQueue actor
#[derive(Debug)]
pub enum QueueCommand {
    Enqueue {
        request: EnqueueRequest,
        respond: oneshot::Sender<Job>,
    },
    Dequeue {
        worker_id: String,
        type_filter: Option<String>,
        respond: oneshot::Sender<Option<Job>>,
    },
    Complete {
        job_id: String,
        result: Option<serde_json::Value>,
        respond: oneshot::Sender<Result<Job, QueueError>>,
    },
    Fail {
        job_id: String,
        error: String,
        should_retry: Option<bool>,
        respond: oneshot::Sender<Result<Job, QueueError>>,
    },
    GetJob {
        job_id: String,
        respond: oneshot::Sender<Result<Job, QueueError>>,
    },
    Stats {
        respond: oneshot::Sender<QueueStats>,
    },
    RetryDead {
        respond: oneshot::Sender<usize>,
    },
    Purge {
        older_than_hours: u64,
        statuses: Vec<JobStatus>,
        respond: oneshot::Sender<usize>,
    },
}

// ============================================================================
// Handle
// ============================================================================

/// Handle to interact with the JobQueue actor
#[derive(Clone)]
pub struct JobQueueHandle {
    tx: mpsc::Sender<QueueCommand>,
}

impl JobQueueHandle {
    /// Create the command channel; the receiver goes to [`JobQueue::new`]
    pub fn channel() -> (Self, mpsc::Receiver<QueueCommand>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        (Self { tx }, rx)
    }

    async fn request<T>(
        &self,
        cmd: QueueCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, QueueError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        rx.await
            .map_err(|e| QueueError::Unavailable(e.to_string()))
    }

    /// Append a new job to the tail of its priority lane
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Job, QueueError> {
        let (respond, rx) = oneshot::channel();
        self.request(QueueCommand::Enqueue { request, respond }, rx)
            .await
    }

    /// Like enqueue, but with an explicit future eligibility timestamp
    pub async fn schedule(
        &self,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        scheduled_for: DateTime<Utc>,
        priority: JobPriority,
    ) -> Result<Job, QueueError> {
        self.enqueue(EnqueueRequest {
            job_type: job_type.into(),
            payload,
            priority,
            max_retries: None,
            scheduled_for: Some(scheduled_for),
        })
        .await
    }

    /// Claim the next eligible job, `None` when nothing is eligible
    pub async fn dequeue(
        &self,
        worker_id: impl Into<String>,
        type_filter: Option<String>,
    ) -> Result<Option<Job>, QueueError> {
        let (respond, rx) = oneshot::channel();
        self.request(
            QueueCommand::Dequeue {
                worker_id: worker_id.into(),
                type_filter,
                respond,
            },
            rx,
        )
        .await
    }

    pub async fn complete(
        &self,
        job_id: impl Into<String>,
        result: Option<serde_json::Value>,
    ) -> Result<Job, QueueError> {
        let (respond, rx) = oneshot::channel();
        self.request(
            QueueCommand::Complete {
                job_id: job_id.into(),
                result,
                respond,
            },
            rx,
        )
        .await?
    }

    pub async fn fail(
        &self,
        job_id: impl Into<String>,
        error: impl Into<String>,
        should_retry: Option<bool>,
    ) -> Result<Job, QueueError> {
        let (respond, rx) = oneshot::channel();
        self.request(
            QueueCommand::Fail {
                job_id: job_id.into(),
                error: error.into(),
                should_retry,
                respond,
            },
            rx,
        )
        .await?
    }

    pub async fn get_job(&self, job_id: impl Into<String>) -> Result<Job, QueueError> {
        let (respond, rx) = oneshot::channel();
        self.request(
            QueueCommand::GetJob {
                job_id: job_id.into(),
                respond,
            },
            rx,
        )
        .await?
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let (respond, rx) = oneshot::channel();
        self.request(QueueCommand::Stats { respond }, rx).await
    }

    /// Reset every dead job to pending at its lane tail, returning the count
    pub async fn retry_dead(&self) -> Result<usize, QueueError> {
        let (respond, rx) = oneshot::channel();
        self.request(QueueCommand::RetryDead { respond }, rx).await
    }

    /// Delete jobs in the given statuses completed before the cutoff
    pub async fn purge(
        &self,
        older_than_hours: u64,
        statuses: Vec<JobStatus>,
    ) -> Result<usize, QueueError> {
        let (respond, rx) = oneshot::channel();
        self.request(
            QueueCommand::Purge {
                older_than_hours,
                statuses,
                respond,
            },
            rx,
        )
        .await
    }
}

// ============================================================================
// Stats
// ============================================================================

/// Counters maintained incrementally by the actor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueCounters {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub dead: u64,
    pub total_processed: u64,
    /// Running average of job processing time in milliseconds
    pub avg_processing_ms: f64,
}

/// Aggregate queue statistics returned by `stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    #[serde(flatten)]
    pub counters: QueueCounters,
    /// Lane depths in scan order: critical, high, normal, low
    pub lane_depths: [usize; 4],
    pub total_jobs: usize,
}

// ============================================================================
// Actor state
// ============================================================================

/// Serializable actor state, snapshotted after every mutation
#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueState {
    jobs: HashMap<String, Job>,
    /// Per-lane FIFO of job ids, indexed by `JobPriority::lane_index`
    lanes: [VecDeque<String>; 4],
    counters: QueueCounters,
}

// ============================================================================
// Job Queue actor
// ============================================================================

/// Job Queue — single logical actor owning all job state
pub struct JobQueue {
    rx: mpsc::Receiver<QueueCommand>,
    healing: HealingHandle,
    store: Arc<dyn SnapshotStore>,
    config: QueueConfig,
    state: QueueState,
}

impl JobQueue {
    pub fn new(
        rx: mpsc::Receiver<QueueCommand>,
        healing: HealingHandle,
        store: Arc<dyn SnapshotStore>,
        config: QueueConfig,
    ) -> Self {
        Self {
            rx,
            healing,
            store,
            config,
            state: QueueState::default(),
        }
    }

    /// Run the queue actor loop (call from tokio::spawn)
    pub async fn run(mut self) {
        self.restore();

        let sweep_secs = self.config.sweep_interval_secs.max(1);
        let mut sweep = tokio::time::interval(std::time::Duration::from_secs(sweep_secs));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            jobs = self.state.jobs.len(),
            sweep_secs = sweep_secs,
            "JobQueue started"
        );

        loop {
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                _ = sweep.tick() => self.promote_scheduled(),
            }
        }

        info!("JobQueue stopped");
    }

    fn handle(&mut self, cmd: QueueCommand) {
        match cmd {
            QueueCommand::Enqueue { request, respond } => {
                let job = self.enqueue(request);
                let _ = respond.send(job);
            }
            QueueCommand::Dequeue {
                worker_id,
                type_filter,
                respond,
            } => {
                let job = self.dequeue(&worker_id, type_filter.as_deref());
                let _ = respond.send(job);
            }
            QueueCommand::Complete {
                job_id,
                result,
                respond,
            } => {
                let _ = respond.send(self.complete(&job_id, result));
            }
            QueueCommand::Fail {
                job_id,
                error,
                should_retry,
                respond,
            } => {
                let _ = respond.send(self.fail(&job_id, error, should_retry));
            }
            QueueCommand::GetJob { job_id, respond } => {
                let result = self
                    .state
                    .jobs
                    .get(&job_id)
                    .cloned()
                    .ok_or(QueueError::NotFound(job_id));
                let _ = respond.send(result);
            }
            QueueCommand::Stats { respond } => {
                let _ = respond.send(self.stats());
            }
            QueueCommand::RetryDead { respond } => {
                let _ = respond.send(self.retry_dead());
            }
            QueueCommand::Purge {
                older_than_hours,
                statuses,
                respond,
            } => {
                let _ = respond.send(self.purge(older_than_hours, &statuses));
            }
        }
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    fn enqueue(&mut self, request: EnqueueRequest) -> Job {
        let mut job = Job::new(
            request.job_type,
            request.payload,
            request.priority,
            request.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        );
        job.scheduled_for = request.scheduled_for;

        let lane = job.priority.lane_index();
        self.state.lanes[lane].push_back(job.id.clone());
        self.state.counters.pending += 1;
        self.state.jobs.insert(job.id.clone(), job.clone());

        debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            priority = %job.priority,
            scheduled = job.scheduled_for.is_some(),
            "Job enqueued"
        );

        self.persist();
        job
    }

    /// Scan lanes critical→high→normal→low for the first eligible job
    fn dequeue(&mut self, worker_id: &str, type_filter: Option<&str>) -> Option<Job> {
        let now = Utc::now();

        for priority in JobPriority::LANES {
            let lane = priority.lane_index();
            let position = self.state.lanes[lane].iter().position(|id| {
                self.state.jobs.get(id).is_some_and(|job| {
                    job.is_eligible(now)
                        && type_filter.map_or(true, |t| job.job_type == t)
                })
            });

            if let Some(pos) = position {
                // Position came from the scan above, the id is present
                let Some(job_id) = self.state.lanes[lane].remove(pos) else {
                    continue;
                };
                let Some(job) = self.state.jobs.get_mut(&job_id) else {
                    continue;
                };

                job.status = JobStatus::Processing;
                job.started_at = Some(now);
                self.state.counters.pending = self.state.counters.pending.saturating_sub(1);
                self.state.counters.processing += 1;

                let claimed = job.clone();
                debug!(
                    job_id = %claimed.id,
                    job_type = %claimed.job_type,
                    worker = worker_id,
                    "Job claimed"
                );

                self.persist();
                return Some(claimed);
            }
        }

        None
    }

    fn complete(
        &mut self,
        job_id: &str,
        result: Option<serde_json::Value>,
    ) -> Result<Job, QueueError> {
        let job = self
            .state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;

        let now = Utc::now();
        job.status = JobStatus::Completed;
        job.completed_at = Some(now);
        job.result = result;

        let sample_ms = job
            .started_at
            .map_or(0.0, |start| (now - start).num_milliseconds() as f64);

        let counters = &mut self.state.counters;
        counters.processing = counters.processing.saturating_sub(1);
        counters.completed += 1;
        counters.total_processed += 1;

        let n = counters.total_processed as f64;
        counters.avg_processing_ms = (counters.avg_processing_ms * (n - 1.0) + sample_ms) / n;

        let completed = job.clone();
        debug!(
            job_id = %completed.id,
            processing_ms = sample_ms,
            avg_ms = counters.avg_processing_ms,
            "Job completed"
        );

        self.persist();
        Ok(completed)
    }

    /// Retry with exponential backoff, or dead-letter once the budget is spent
    fn fail(
        &mut self,
        job_id: &str,
        error: String,
        should_retry: Option<bool>,
    ) -> Result<Job, QueueError> {
        let job = self
            .state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;

        self.state.counters.processing = self.state.counters.processing.saturating_sub(1);

        // A job failed before being claimed may still sit in its lane;
        // clear any stale entry so reinsertion cannot duplicate it
        let lane = job.priority.lane_index();
        let was_laned = self.state.lanes[lane].iter().any(|id| id == job_id);
        self.state.lanes[lane].retain(|id| id != job_id);
        if was_laned {
            self.state.counters.pending = self.state.counters.pending.saturating_sub(1);
        }

        let retry_permitted = should_retry != Some(false) && job.retry_count < job.max_retries;

        if retry_permitted {
            // Backoff uses the pre-increment retry count: 1s, 2s, 4s, ...
            let delay_secs = 2u64.saturating_pow(job.retry_count).min(86_400);
            job.retry_count += 1;
            job.status = JobStatus::Pending;
            job.error = Some(error);
            job.scheduled_for = Some(Utc::now() + Duration::seconds(delay_secs as i64));

            self.state.lanes[lane].push_front(job.id.clone());
            self.state.counters.pending += 1;

            info!(
                job_id = %job.id,
                retry = job.retry_count,
                max_retries = job.max_retries,
                delay_secs = delay_secs,
                "Job failed, retrying with backoff"
            );
        } else {
            job.status = JobStatus::Dead;
            job.completed_at = Some(Utc::now());
            job.error = Some(error);
            self.state.counters.dead += 1;

            warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                retries = job.retry_count,
                "Job dead-lettered after exhausting retries"
            );

            // Best-effort notification; the dead-letter itself is already durable
            self.healing.notify_dead_job(job.clone());
        }

        let failed = job.clone();
        self.persist();
        Ok(failed)
    }

    fn stats(&self) -> QueueStats {
        let lane_depths = [
            self.state.lanes[0].len(),
            self.state.lanes[1].len(),
            self.state.lanes[2].len(),
            self.state.lanes[3].len(),
        ];
        QueueStats {
            counters: self.state.counters.clone(),
            lane_depths,
            total_jobs: self.state.jobs.len(),
        }
    }

    fn retry_dead(&mut self) -> usize {
        let dead_ids: Vec<String> = self
            .state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Dead)
            .map(|j| j.id.clone())
            .collect();

        for id in &dead_ids {
            if let Some(job) = self.state.jobs.get_mut(id) {
                job.status = JobStatus::Pending;
                job.retry_count = 0;
                job.error = None;
                job.completed_at = None;
                job.scheduled_for = None;
                self.state.lanes[job.priority.lane_index()].push_back(id.clone());
                self.state.counters.pending += 1;
                self.state.counters.dead = self.state.counters.dead.saturating_sub(1);
            }
        }

        if !dead_ids.is_empty() {
            info!(requeued = dead_ids.len(), "Dead jobs reset to pending");
            self.persist();
        }
        dead_ids.len()
    }

    fn purge(&mut self, older_than_hours: u64, statuses: &[JobStatus]) -> usize {
        let cutoff = Utc::now() - Duration::hours(older_than_hours as i64);

        let purge_ids: Vec<String> = self
            .state
            .jobs
            .values()
            .filter(|j| {
                statuses.contains(&j.status)
                    && j.completed_at.is_some_and(|at| at < cutoff)
            })
            .map(|j| j.id.clone())
            .collect();

        for id in &purge_ids {
            if let Some(job) = self.state.jobs.remove(id) {
                if job.status == JobStatus::Dead {
                    self.state.counters.dead = self.state.counters.dead.saturating_sub(1);
                }
            }
            for lane in &mut self.state.lanes {
                lane.retain(|queued| queued != id);
            }
        }

        if !purge_ids.is_empty() {
            info!(
                purged = purge_ids.len(),
                older_than_hours = older_than_hours,
                "Old jobs purged"
            );
            self.persist();
        }
        purge_ids.len()
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Clear elapsed `scheduled_for` fields so backoff delays resolve at
    /// roughly sweep resolution
    fn promote_scheduled(&mut self) {
        let now = Utc::now();
        let mut promoted = 0;

        for job in self.state.jobs.values_mut() {
            if job.status == JobStatus::Pending
                && job.scheduled_for.is_some_and(|at| at <= now)
            {
                job.scheduled_for = None;
                promoted += 1;
            }
        }

        if promoted > 0 {
            debug!(promoted = promoted, "Scheduled jobs promoted");
            self.persist();
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    fn restore(&mut self) {
        match self.store.load(SNAPSHOT_NAMESPACE) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(state) => {
                    self.state = state;
                    info!(jobs = self.state.jobs.len(), "JobQueue snapshot restored");
                }
                Err(e) => {
                    error!(error = %e, "JobQueue snapshot corrupted, starting empty");
                }
            },
            Ok(None) => debug!("No JobQueue snapshot, starting empty"),
            Err(e) => error!(error = %e, "JobQueue snapshot load failed, starting empty"),
        }
    }

    fn persist(&self) {
        let bytes = match serde_json::to_vec(&self.state) {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "JobQueue state serialization failed");
                return;
            }
        };
        if let Err(e) = self.store.save(SNAPSHOT_NAMESPACE, &bytes) {
            error!(error = %e, "JobQueue snapshot save failed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

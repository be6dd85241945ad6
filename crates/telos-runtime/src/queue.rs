//! Priority-laned job queue with visibility leases.
//!
//! Four lanes (`critical > high > normal > low`) polled in strict
//! priority order. Claiming a job starts a visibility lease; a lease
//! that lapses without heartbeat returns the job to its lane. Jobs that
//! exhaust their attempt budget move to the dead-letter lane. Each lane
//! has a soft cap; enqueue into a full lane fails `Busy`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use telos_kernel::clock::Clock;
use telos_kernel::config::QueueConfig;
use telos_kernel::error::{EngineError, EngineResult};
use telos_kernel::goal::GoalId;
use telos_kernel::job::{Job, JobId, JobPriority, JobStatus};
use telos_kernel::retry::RetryConfig;

/// Queue-wide counters.
#[derive(Debug, Default)]
struct QueueMetrics {
    enqueued: AtomicU64,
    claimed: AtomicU64,
    requeued: AtomicU64,
    dead_lettered: AtomicU64,
    rejected_busy: AtomicU64,
}

/// Point-in-time view of the queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueMetricsSnapshot {
    pub enqueued: u64,
    pub claimed: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    pub rejected_busy: u64,
}

struct QueueInner {
    jobs: HashMap<JobId, Job>,
    lanes: [VecDeque<JobId>; 4],
    dead_letter: Vec<JobId>,
    /// `(tenant, key) → (job, recorded_at)` for idempotent enqueue.
    idempotency: HashMap<(String, String), (JobId, u64)>,
    /// Jobs requeued with backoff are invisible until this instant.
    not_before: HashMap<JobId, u64>,
    cancel_requested: HashSet<JobId>,
}

/// The shared job queue.
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    metrics: QueueMetrics,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
}

impl JobQueue {
    pub fn new(config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                jobs: HashMap::new(),
                lanes: [const { VecDeque::new() }; 4],
                dead_letter: Vec::new(),
                idempotency: HashMap::new(),
                not_before: HashMap::new(),
                cancel_requested: HashSet::new(),
            }),
            notify: Notify::new(),
            metrics: QueueMetrics::default(),
            config,
            clock,
        }
    }

    /// Enqueue a job. Duplicate idempotency keys inside the window return
    /// the original job id without enqueuing again.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Busy`] when the target lane is at its soft
    /// cap.
    pub fn enqueue(
        &self,
        tenant_id: &str,
        goal_ref: Option<GoalId>,
        priority: JobPriority,
        payload: serde_json::Value,
        idempotency_key: Option<&str>,
    ) -> EngineResult<JobId> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();

        if let Some(key) = idempotency_key {
            let map_key = (tenant_id.to_string(), key.to_string());
            if let Some((existing, recorded_at)) = inner.idempotency.get(&map_key)
                && now.saturating_sub(*recorded_at) <= self.config.idempotency_window_ms
            {
                debug!(job_id = %existing, "idempotent enqueue joined existing job");
                return Ok(*existing);
            }
        }

        let lane = priority.lane_index();
        if inner.lanes[lane].len() >= self.config.lane_capacity {
            self.metrics.rejected_busy.fetch_add(1, Ordering::Relaxed);
            return Err(EngineError::Busy {
                lane: priority.as_str().to_string(),
            });
        }

        let job = Job::new(
            tenant_id,
            goal_ref,
            priority,
            payload,
            self.config.max_attempts,
            now,
        );
        let id = job.id;
        if let Some(key) = idempotency_key {
            inner
                .idempotency
                .insert((tenant_id.to_string(), key.to_string()), (id, now));
        }
        inner.lanes[lane].push_back(id);
        inner.jobs.insert(id, job);
        drop(inner);

        self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        Ok(id)
    }

    /// Claim the next visible job, scanning lanes in priority order.
    ///
    /// Claiming increments `attempts` and starts the visibility lease.
    pub fn claim(&self) -> Option<Job> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        for lane in 0..inner.lanes.len() {
            // rotate past backoff-delayed jobs without starving the lane scan
            let mut scanned = 0;
            let lane_len = inner.lanes[lane].len();
            while scanned < lane_len {
                let id = match inner.lanes[lane].pop_front() {
                    Some(id) => id,
                    None => break,
                };
                scanned += 1;
                let ready = inner.not_before.get(&id).is_none_or(|t| now >= *t);
                if !ready {
                    inner.lanes[lane].push_back(id);
                    continue;
                }
                inner.not_before.remove(&id);
                let deadline = now + self.config.visibility_timeout_ms;
                if let Some(job) = inner.jobs.get_mut(&id) {
                    job.status = JobStatus::Claimed;
                    job.attempts += 1;
                    job.claimed_at = Some(now);
                    job.visibility_deadline = Some(deadline);
                    let claimed = job.clone();
                    self.metrics.claimed.fetch_add(1, Ordering::Relaxed);
                    debug!(job_id = %id, attempts = claimed.attempts, "job claimed");
                    return Some(claimed);
                }
            }
        }
        None
    }

    /// Await a claimable job, or return `None` after `timeout`.
    pub async fn claim_wait(&self, timeout: std::time::Duration) -> Option<Job> {
        if let Some(job) = self.claim() {
            return Some(job);
        }
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
        self.claim()
    }

    /// Renew the visibility lease of a claimed job.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInput`] for unknown jobs and
    /// [`EngineError::InvalidTransition`] for jobs no longer claimed.
    pub fn heartbeat(&self, job_id: JobId) -> EngineResult<()> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown job {job_id}")))?;
        if job.status != JobStatus::Claimed {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", job.status),
                to: "heartbeat".into(),
            });
        }
        job.visibility_deadline = Some(now + self.config.visibility_timeout_ms);
        Ok(())
    }

    /// Return expired claimed jobs to their lanes; jobs whose attempt
    /// budget is spent go to the dead-letter lane instead. Returns the
    /// goal refs of dead-lettered jobs so the caller can fail them.
    pub fn reap_expired(&self) -> Vec<(JobId, Option<GoalId>)> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let expired: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|j| j.visibility_expired(now))
            .map(|j| j.id)
            .collect();

        let mut dead = Vec::new();
        let mut requeued_any = false;
        for id in expired {
            let Some(job) = inner.jobs.get_mut(&id) else {
                continue;
            };
            if job.attempts >= job.max_attempts {
                job.status = JobStatus::Failed;
                job.error = Some("visibility expired; attempts exhausted".into());
                job.finished_at = Some(now);
                let goal_ref = job.goal_ref;
                warn!(job_id = %id, "job dead-lettered after visibility expiry");
                inner.dead_letter.push(id);
                self.metrics.dead_lettered.fetch_add(1, Ordering::Relaxed);
                dead.push((id, goal_ref));
            } else {
                job.status = JobStatus::Queued;
                job.visibility_deadline = None;
                job.claimed_at = None;
                let lane = job.priority.lane_index();
                info!(job_id = %id, attempts = job.attempts, "visibility expired, job requeued");
                inner.lanes[lane].push_back(id);
                self.metrics.requeued.fetch_add(1, Ordering::Relaxed);
                requeued_any = true;
            }
        }
        if requeued_any {
            self.notify.notify_waiters();
        }
        dead
    }

    /// Return a claimed job to its lane without counting the attempt.
    /// Used when the cycle lock was unavailable. The job becomes visible
    /// again after an exponential backoff with jitter.
    pub fn requeue_unclaimed(&self, job_id: JobId) -> EngineResult<()> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown job {job_id}")))?;
        if job.status != JobStatus::Claimed {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", job.status),
                to: "requeue".into(),
            });
        }
        job.status = JobStatus::Queued;
        job.attempts = job.attempts.saturating_sub(1);
        job.visibility_deadline = None;
        job.claimed_at = None;

        let backoff = RetryConfig::exponential(
            self.config.max_attempts as usize,
            100,
            self.config.visibility_timeout_ms,
        );
        let delay = backoff.delay_for(job.attempts as usize).as_millis() as u64;
        let lane = job.priority.lane_index();
        let id = job.id;
        inner.not_before.insert(id, now + delay);
        inner.lanes[lane].push_back(id);
        drop(inner);

        self.metrics.requeued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Record a successful cycle result and finish the job.
    pub fn complete(&self, job_id: JobId, result: serde_json::Value) -> EngineResult<()> {
        self.finish(job_id, JobStatus::Succeeded, Some(result), None)
    }

    /// Record a failed cycle. Jobs with remaining attempts return to
    /// their lane; exhausted jobs are dead-lettered. Returns `true` when
    /// the job was dead-lettered.
    pub fn fail(&self, job_id: JobId, error: &str) -> EngineResult<bool> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown job {job_id}")))?;
        if job.status != JobStatus::Claimed {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", job.status),
                to: "fail".into(),
            });
        }
        job.error = Some(error.to_string());
        if job.attempts >= job.max_attempts {
            job.status = JobStatus::Failed;
            job.finished_at = Some(now);
            let id = job.id;
            inner.dead_letter.push(id);
            self.metrics.dead_lettered.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        } else {
            job.status = JobStatus::Queued;
            job.visibility_deadline = None;
            job.claimed_at = None;
            let lane = job.priority.lane_index();
            let id = job.id;
            inner.lanes[lane].push_back(id);
            drop(inner);
            self.metrics.requeued.fetch_add(1, Ordering::Relaxed);
            self.notify.notify_one();
            Ok(false)
        }
    }

    /// Best-effort cancel.
    ///
    /// Queued jobs are cancelled immediately; claimed jobs get a cancel
    /// request their worker observes at the next deadline check.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] when the job is already
    /// terminal (too late).
    pub fn cancel(&self, job_id: JobId) -> EngineResult<()> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown job {job_id}")))?;
        match job.status {
            JobStatus::Queued => {
                job.status = JobStatus::Cancelled;
                job.finished_at = Some(now);
                let id = job.id;
                for lane in &mut inner.lanes {
                    lane.retain(|queued| *queued != id);
                }
                Ok(())
            }
            JobStatus::Claimed => {
                let id = job.id;
                inner.cancel_requested.insert(id);
                Ok(())
            }
            terminal => Err(EngineError::InvalidTransition {
                from: format!("{terminal:?}"),
                to: "cancelled (too late)".into(),
            }),
        }
    }

    /// Whether a cancel was requested for a claimed job.
    pub fn cancel_requested(&self, job_id: JobId) -> bool {
        self.inner.lock().cancel_requested.contains(&job_id)
    }

    /// Mark a claimed job cancelled after its worker observed the request.
    pub fn acknowledge_cancel(&self, job_id: JobId) -> EngineResult<()> {
        self.finish(job_id, JobStatus::Cancelled, None, Some("cancelled"))
    }

    /// Read a job's current state.
    pub fn status(&self, job_id: JobId) -> Option<Job> {
        self.inner.lock().jobs.get(&job_id).cloned()
    }

    /// Ids currently in the dead-letter lane.
    pub fn dead_letter_ids(&self) -> Vec<JobId> {
        self.inner.lock().dead_letter.clone()
    }

    /// Jobs waiting in lanes (visible or backoff-delayed).
    pub fn queued_len(&self) -> usize {
        self.inner.lock().lanes.iter().map(VecDeque::len).sum()
    }

    pub fn metrics(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            enqueued: self.metrics.enqueued.load(Ordering::Relaxed),
            claimed: self.metrics.claimed.load(Ordering::Relaxed),
            requeued: self.metrics.requeued.load(Ordering::Relaxed),
            dead_lettered: self.metrics.dead_lettered.load(Ordering::Relaxed),
            rejected_busy: self.metrics.rejected_busy.load(Ordering::Relaxed),
        }
    }

    fn finish(
        &self,
        job_id: JobId,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<&str>,
    ) -> EngineResult<()> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown job {job_id}")))?;
        if job.status != JobStatus::Claimed {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", job.status),
                to: format!("{status:?}"),
            });
        }
        job.status = status;
        job.result = result;
        job.error = error.map(String::from);
        job.finished_at = Some(now);
        job.visibility_deadline = None;
        let id = job.id;
        inner.cancel_requested.remove(&id);
        Ok(())
    }
}

//! Worker — polls the queue, runs cycles under lease and lock.
//!
//! One worker claims one job at a time (per `worker.concurrency` slot),
//! takes the `(tenant, goal)` cycle lock, and drives the agent loop
//! until the goal settles, the cycle budget is spent, or the job is
//! cancelled. A background task renews the visibility lease and the
//! lock while the cycle runs.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use telos_kernel::cycle::CycleStatus;
use telos_kernel::error::EngineError;
use telos_kernel::goal::{GoalId, GoalStatus};
use telos_kernel::job::Job;

use crate::agent_loop::EngineLoop;
use crate::context::WorkerContext;

/// A running worker. Dropping the handle does not stop the worker; call
/// [`WorkerHandle::shutdown`].
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal shutdown and wait for the polling loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}

/// The worker itself.
pub struct Worker {
    ctx: Arc<WorkerContext>,
    worker_id: String,
}

impl Worker {
    /// Register in the service registry and start polling on a
    /// background task.
    pub fn spawn(ctx: Arc<WorkerContext>, worker_id: impl Into<String>) -> WorkerHandle {
        let worker_id = worker_id.into();
        ctx.services.register(
            &worker_id,
            "worker",
            HashSet::from(["agent-loop".to_string()]),
            "local",
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Worker {
            ctx,
            worker_id: worker_id.clone(),
        };
        let join = tokio::spawn(async move {
            worker.run(shutdown_rx).await;
            info!(%worker_id, "worker stopped");
        });
        WorkerHandle { shutdown_tx, join }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let ctx = self.ctx.clone();
        let poll_interval = Duration::from_millis(ctx.config.worker.poll_interval_ms);
        let heartbeat_interval = Duration::from_millis(ctx.config.worker.heartbeat_ms);
        let slots = Arc::new(Semaphore::new(ctx.config.worker.concurrency.max(1)));

        let mut last_registry_beat = ctx.clock.now_millis();
        loop {
            if *shutdown.borrow() {
                break;
            }

            // service-registry heartbeat and housekeeping on its cadence
            let now = ctx.clock.now_millis();
            if now.saturating_sub(last_registry_beat) >= ctx.config.worker.heartbeat_ms {
                last_registry_beat = now;
                if ctx.services.heartbeat(&self.worker_id).is_err() {
                    ctx.services.register(
                        &self.worker_id,
                        "worker",
                        HashSet::from(["agent-loop".to_string()]),
                        "local",
                    );
                }
                ctx.services.evict_expired();
            }

            // return lapsed jobs to their lanes; fail dead-lettered goals
            for (job_id, goal_ref) in ctx.queue.reap_expired() {
                if let Some(goal_id) = goal_ref {
                    warn!(%job_id, %goal_id, "dead-lettered job fails its goal");
                    let _ = ctx.goals.mark(goal_id, GoalStatus::Failed, None);
                }
            }

            // backpressure: wait for a concurrency slot before claiming
            let permit = match slots.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let job = match ctx.queue.claim() {
                Some(job) => job,
                None => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
            };

            let worker_id = self.worker_id.clone();
            let ctx_job = ctx.clone();
            let hb_interval = heartbeat_interval.min(Duration::from_millis(
                ctx.config.queue.visibility_timeout_ms / 3,
            ));
            tokio::spawn(async move {
                let _permit = permit;
                process_job(ctx_job, worker_id, job, hb_interval).await;
            });
        }
    }
}

/// Run one claimed job to a terminal outcome.
async fn process_job(
    ctx: Arc<WorkerContext>,
    worker_id: String,
    job: Job,
    heartbeat_interval: Duration,
) {
    let job_id = job.id;

    if ctx.queue.cancel_requested(job_id) {
        let _ = ctx.queue.acknowledge_cancel(job_id);
        return;
    }

    // resolve the goal this job advances
    let goal_id: Option<GoalId> = job
        .goal_ref
        .or_else(|| ctx.goals.next(Some(&job.tenant_id)).map(|g| g.id));
    let Some(goal_id) = goal_id else {
        // nothing eligible for this tenant: the job is trivially done
        let _ = ctx.queue.complete(job_id, serde_json::json!({ "status": "idle" }));
        return;
    };

    // at-most-one concurrent cycle per (tenant, goal)
    let lock = match ctx.locks.try_acquire(&job.tenant_id, goal_id, &worker_id) {
        Ok(guard) => Arc::new(guard),
        Err(EngineError::LockUnavailable { .. }) => {
            debug!(%job_id, %goal_id, "goal is locked elsewhere, requeueing");
            let _ = ctx.queue.requeue_unclaimed(job_id);
            return;
        }
        Err(e) => {
            error!(%job_id, error = %e, "lock table failure");
            let _ = ctx.queue.requeue_unclaimed(job_id);
            return;
        }
    };

    // lease renewal while the cycle runs
    let hb_queue = ctx.queue.clone();
    let hb_lock = lock.clone();
    let heartbeat = tokio::spawn(async move {
        loop {
            tokio::time::sleep(heartbeat_interval).await;
            if hb_queue.heartbeat(job_id).is_err() {
                break;
            }
            hb_lock.renew();
        }
    });

    let engine = EngineLoop::new(ctx.clone());
    let max_cycles = ctx.config.cycle.max_cycles_per_job.max(1);
    let mut last_result = None;
    let mut infrastructure_failed = false;

    for _ in 0..max_cycles {
        if ctx.queue.cancel_requested(job_id) {
            let _ = ctx.queue.acknowledge_cancel(job_id);
            heartbeat.abort();
            return;
        }
        let deadline = ctx
            .queue
            .status(job_id)
            .and_then(|j| j.visibility_deadline);
        match engine
            .run_cycle(&job.tenant_id, Some(goal_id), deadline)
            .await
        {
            Ok(result) => {
                let settled = result.status != CycleStatus::Progressed;
                last_result = Some(result);
                if settled {
                    break;
                }
            }
            Err(e) if !e.is_terminal() => {
                // infrastructure-class failure: abort without touching
                // the job; the visibility lease lapses and the queue
                // retries elsewhere
                error!(%job_id, error = %e, "cycle aborted");
                infrastructure_failed = true;
                break;
            }
            Err(e) => {
                error!(%job_id, error = %e, "cycle failed");
                let dead = ctx.queue.fail(job_id, &e.to_string()).unwrap_or(false);
                if dead {
                    let _ = ctx.goals.mark(goal_id, GoalStatus::Failed, None);
                }
                heartbeat.abort();
                return;
            }
        }
    }
    heartbeat.abort();

    if infrastructure_failed {
        drop(lock);
        return;
    }

    // a settled cycle completes the job; the goal's own status (including
    // failed) travels in the result payload
    let payload = match &last_result {
        Some(result) => serde_json::to_value(result).unwrap_or(serde_json::Value::Null),
        None => serde_json::json!({ "status": "idle" }),
    };
    let _ = ctx.queue.complete(job_id, payload);
    drop(lock);
}

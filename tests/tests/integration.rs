//! Cross-crate scenarios: the engine driven end to end through the
//! queue, workers, locks, memory, and learning store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use telos_kernel::config::EngineConfig;
use telos_kernel::goal::GoalStatus;
use telos_kernel::job::{JobId, JobPriority, JobStatus};
use telos_kernel::tool::{ToolErrorKind, ToolOutput};
use telos_runtime::{Worker, WorkerContext};
use telos_testing::TestEngine;
use telos_testing::tools::{MockTool, search_mock, summarize_mock};

async fn wait_terminal(ctx: &WorkerContext, job_id: JobId) -> JobStatus {
    for _ in 0..5_000 {
        if let Some(job) = ctx.queue.status(job_id)
            && job.status.is_terminal()
        {
            return job.status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job never reached a terminal status");
}

/// Scenario: a two-tool goal runs queued → claimed → succeeded, leaves
/// two observations, and seeds the learning store at confidence ≈ 0.3.
#[tokio::test(start_paused = true)]
async fn happy_path_summarize_goal() {
    let engine = TestEngine::with_defaults();
    let ctx = &engine.ctx;
    let search = search_mock();
    let summarize = summarize_mock();
    ctx.tools.register(search.clone()).unwrap();
    ctx.tools.register(summarize.clone()).unwrap();

    let goal = engine
        .goal("acme", "summarize topic x", 0.8)
        .with_constraint("query", json!("x"));
    let goal_id = ctx.goals.add(goal).unwrap();
    let job_id = ctx
        .queue
        .enqueue("acme", Some(goal_id), JobPriority::High, json!({}), None)
        .unwrap();

    let worker = Worker::spawn(ctx.clone(), "w-1");
    let status = wait_terminal(ctx, job_id).await;
    worker.shutdown().await;

    assert_eq!(status, JobStatus::Succeeded);
    telos_testing::assert_tool_called!(search, 1);
    telos_testing::assert_tool_called!(summarize, 1);

    let goal = ctx.goals.get(goal_id).unwrap();
    assert_eq!(goal.status, GoalStatus::Completed);
    assert_eq!(goal.progress, 1.0);

    // two (action, observation) pairs
    assert_eq!(ctx.memory.episode_count("acme"), 4);

    // first learning write lands at 0.3 × outcome
    assert_eq!(ctx.learning.len(), 1);
    let recalled = ctx
        .learning
        .recall(&engine.goal("acme", "summarize topic x", 0.5), ctx.tools.as_ref())
        .expect("sequence should be recallable");
    assert_eq!(recalled.record.action_sequence, vec!["search", "summarize"]);
    assert!((recalled.record.confidence - 0.3).abs() < 1e-9);
}

/// Scenario: a tool that fails transiently on every attempt exhausts its
/// retry budget each cycle and the goal fails after `max_failures`
/// consecutive failed cycles.
#[tokio::test(start_paused = true)]
async fn retry_exhaustion_fails_the_goal() {
    let engine = TestEngine::with_defaults();
    let ctx = &engine.ctx;
    let search = Arc::new(
        MockTool::with_string_param("search", "query").with_fallback(ToolOutput::failure(
            ToolErrorKind::Transient,
            "connection reset",
        )),
    );
    ctx.tools.register(search.clone()).unwrap();
    ctx.tools.register(summarize_mock()).unwrap();

    let goal = engine
        .goal("acme", "summarize topic x", 0.8)
        .with_constraint("query", json!("x"));
    let goal_id = ctx.goals.add(goal).unwrap();
    let job_id = ctx
        .queue
        .enqueue("acme", Some(goal_id), JobPriority::Normal, json!({}), None)
        .unwrap();

    let worker = Worker::spawn(ctx.clone(), "w-1");
    wait_terminal(ctx, job_id).await;
    worker.shutdown().await;

    let goal = ctx.goals.get(goal_id).unwrap();
    assert_eq!(goal.status, GoalStatus::Failed);
    assert_eq!(goal.last_error.as_deref(), Some("tool_permanent"));

    // 3 attempts per cycle × 5 failed cycles
    telos_testing::assert_tool_called!(search, 15);
    // every failed cycle still appended its (action, observation) pair
    assert_eq!(ctx.memory.episode_count("acme"), 10);
    // the failure was recorded against the signature
    assert_eq!(ctx.learning.len(), 1);
}

/// A single transient blip is absorbed by the registry's retry policy
/// and never surfaces as a cycle failure.
#[tokio::test(start_paused = true)]
async fn transient_blip_is_absorbed_by_retry() {
    let engine = TestEngine::with_defaults();
    let ctx = &engine.ctx;
    let search = search_mock();
    search.push_transient_failures(1);
    ctx.tools.register(search.clone()).unwrap();
    ctx.tools.register(summarize_mock()).unwrap();

    let goal = engine
        .goal("acme", "summarize topic x", 0.8)
        .with_constraint("query", json!("x"));
    let goal_id = ctx.goals.add(goal).unwrap();
    let job_id = ctx
        .queue
        .enqueue("acme", Some(goal_id), JobPriority::Normal, json!({}), None)
        .unwrap();

    let worker = Worker::spawn(ctx.clone(), "w-1");
    let status = wait_terminal(ctx, job_id).await;
    worker.shutdown().await;

    assert_eq!(status, JobStatus::Succeeded);
    assert_eq!(ctx.goals.get(goal_id).unwrap().status, GoalStatus::Completed);
    // the failed first attempt plus the successful retry
    telos_testing::assert_tool_called!(search, 2);
}

/// Scenario: two enqueues with the same idempotency key return the same
/// job id; the goal executes once and learning updates once.
#[tokio::test(start_paused = true)]
async fn duplicate_enqueue_is_idempotent() {
    let engine = TestEngine::with_defaults();
    let ctx = &engine.ctx;
    let search = search_mock();
    let summarize = summarize_mock();
    ctx.tools.register(search.clone()).unwrap();
    ctx.tools.register(summarize.clone()).unwrap();

    let goal = engine
        .goal("acme", "summarize topic x", 0.8)
        .with_constraint("query", json!("x"));
    let goal_id = ctx.goals.add(goal).unwrap();

    let first = ctx
        .queue
        .enqueue("acme", Some(goal_id), JobPriority::High, json!({}), Some("key-7"))
        .unwrap();
    engine.clock.advance(5_000);
    let second = ctx
        .queue
        .enqueue("acme", Some(goal_id), JobPriority::High, json!({}), Some("key-7"))
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(ctx.queue.metrics().enqueued, 1);

    let worker = Worker::spawn(ctx.clone(), "w-1");
    let status = wait_terminal(ctx, first).await;
    worker.shutdown().await;

    assert_eq!(status, JobStatus::Succeeded);
    // a single execution, a single learning update
    telos_testing::assert_tool_called!(search, 1);
    telos_testing::assert_tool_called!(summarize, 1);
    assert_eq!(ctx.learning.len(), 1);
    let recalled = ctx
        .learning
        .recall(&engine.goal("acme", "summarize topic x", 0.5), ctx.tools.as_ref())
        .unwrap();
    assert_eq!(recalled.record.usage_count, 1);
}

/// Scenario: a worker claims a job and dies mid-cycle. After the
/// visibility deadline another worker claims the same job (attempts = 2),
/// takes over the expired lock, and finishes the goal.
#[tokio::test(start_paused = true)]
async fn worker_crash_hands_the_job_to_another_worker() {
    let engine = TestEngine::with_defaults();
    let ctx = &engine.ctx;
    ctx.tools.register(search_mock()).unwrap();
    ctx.tools.register(summarize_mock()).unwrap();

    let goal = engine
        .goal("acme", "summarize topic x", 0.8)
        .with_constraint("query", json!("x"));
    let goal_id = ctx.goals.add(goal).unwrap();
    let job_id = ctx
        .queue
        .enqueue("acme", Some(goal_id), JobPriority::Normal, json!({}), None)
        .unwrap();

    // "worker 1" claims the job and the cycle lock, then crashes: the
    // lock guard is leaked so it is never released, only expired
    let claimed = ctx.queue.claim().unwrap();
    assert_eq!(claimed.attempts, 1);
    let dead_lock = ctx.locks.try_acquire("acme", goal_id, "w-dead").unwrap();
    std::mem::forget(dead_lock);
    assert!(ctx.locks.is_locked("acme", goal_id));

    // past the visibility deadline the job and the lock both lapse
    engine.clock.advance(31_000);

    let worker = Worker::spawn(ctx.clone(), "w-2");
    let status = wait_terminal(ctx, job_id).await;
    worker.shutdown().await;

    assert_eq!(status, JobStatus::Succeeded);
    let job = ctx.queue.status(job_id).unwrap();
    assert_eq!(job.attempts, 2);
    assert_eq!(ctx.goals.get(goal_id).unwrap().status, GoalStatus::Completed);

    // the learning record reflects the successful attempt only
    let recalled = ctx
        .learning
        .recall(&engine.goal("acme", "summarize topic x", 0.5), ctx.tools.as_ref())
        .unwrap();
    assert_eq!(recalled.record.usage_count, 1);
    assert!((recalled.record.confidence - 0.3).abs() < 1e-9);
}

/// Scenario: with `max_patterns = 3`, the fourth record evicts the
/// lowest-value pattern.
#[tokio::test]
async fn pattern_eviction_keeps_the_best_three() {
    let mut config = EngineConfig::default();
    config.learning.max_patterns = 3;
    let engine = TestEngine::new(config);
    let ctx = &engine.ctx;
    ctx.tools.register(search_mock()).unwrap();

    let entries = [
        ("alpha goal text", 0.9),
        ("beta entirely different text", 0.8),
        ("gamma unrelated thing", 0.2),
        ("delta something else", 0.1),
    ];
    for (description, confidence) in entries {
        let goal = engine.goal("acme", description, 0.5);
        ctx.learning
            .record(&goal, "generic", vec!["search".into()], confidence / 0.3);
    }
    ctx.learning.compact();

    assert_eq!(ctx.learning.len(), 3);
    let catalog = ctx.tools.as_ref();
    assert!(ctx
        .learning
        .recall(&engine.goal("acme", "alpha goal text", 0.5), catalog)
        .is_some());
    assert!(ctx
        .learning
        .recall(&engine.goal("acme", "beta entirely different text", 0.5), catalog)
        .is_some());
    assert!(ctx
        .learning
        .recall(&engine.goal("acme", "delta something else", 0.5), catalog)
        .is_none());
}

/// Scenario: a high-priority goal depending on a low-priority one is not
/// eligible until the dependency completes.
#[tokio::test]
async fn dependency_gating_orders_goals() {
    let engine = TestEngine::with_defaults();
    let ctx = &engine.ctx;

    let b = engine.goal("acme", "prerequisite goal b", 0.1);
    let b_id = ctx.goals.add(b).unwrap();
    let a = engine
        .goal("acme", "dependent goal a", 0.9)
        .with_dependency(b_id);
    let a_id = ctx.goals.add(a).unwrap();

    // B is returned first despite the lower priority
    assert_eq!(ctx.goals.next(Some("acme")).unwrap().id, b_id);

    ctx.goals.mark(b_id, GoalStatus::Active, None).unwrap();
    ctx.goals
        .mark(b_id, GoalStatus::Completed, Some(1.0))
        .unwrap();

    assert_eq!(ctx.goals.next(Some("acme")).unwrap().id, a_id);
}

/// Boundary: an unplannable goal blocks without writing any action,
/// observation, or learning state.
#[tokio::test(start_paused = true)]
async fn blocked_goal_leaves_no_trace() {
    let engine = TestEngine::with_defaults();
    let ctx = &engine.ctx;
    ctx.tools.register(search_mock()).unwrap();
    ctx.tools.register(summarize_mock()).unwrap();

    // no "query" binding anywhere
    let goal_id = ctx
        .goals
        .add(engine.goal("acme", "summarize topic x", 0.8))
        .unwrap();
    let job_id = ctx
        .queue
        .enqueue("acme", Some(goal_id), JobPriority::Normal, json!({}), None)
        .unwrap();

    let worker = Worker::spawn(ctx.clone(), "w-1");
    let status = wait_terminal(ctx, job_id).await;
    worker.shutdown().await;

    assert_eq!(status, JobStatus::Succeeded);
    assert_eq!(ctx.goals.get(goal_id).unwrap().status, GoalStatus::Blocked);
    assert_eq!(ctx.memory.episode_count("acme"), 0);
    assert!(ctx.learning.is_empty());
}

/// Boundary: cancelling a queued job prevents any execution; cancelling
/// a finished job reports too-late.
#[tokio::test(start_paused = true)]
async fn cancel_before_claim_prevents_execution() {
    let engine = TestEngine::with_defaults();
    let ctx = &engine.ctx;
    let search = search_mock();
    ctx.tools.register(search.clone()).unwrap();
    ctx.tools.register(summarize_mock()).unwrap();

    let goal = engine
        .goal("acme", "summarize topic x", 0.8)
        .with_constraint("query", json!("x"));
    let goal_id = ctx.goals.add(goal).unwrap();
    let job_id = ctx
        .queue
        .enqueue("acme", Some(goal_id), JobPriority::Normal, json!({}), None)
        .unwrap();

    ctx.queue.cancel(job_id).unwrap();
    assert_eq!(ctx.queue.status(job_id).unwrap().status, JobStatus::Cancelled);
    assert!(ctx.queue.cancel(job_id).is_err()); // too late now

    let worker = Worker::spawn(ctx.clone(), "w-1");
    tokio::time::sleep(Duration::from_secs(2)).await;
    worker.shutdown().await;

    telos_testing::assert_tool_called!(search, 0);
    assert_eq!(ctx.goals.get(goal_id).unwrap().status, GoalStatus::Pending);
}

/// Concurrency: several workers drain a fan of independent goals; every
/// job succeeds exactly once.
#[tokio::test(start_paused = true)]
async fn worker_pool_drains_independent_goals() {
    let engine = TestEngine::with_defaults();
    let ctx = &engine.ctx;
    let search = search_mock();
    ctx.tools.register(search.clone()).unwrap();
    ctx.tools.register(summarize_mock()).unwrap();

    let mut jobs = Vec::new();
    for i in 0..6 {
        let goal = engine
            .goal("acme", &format!("summarize distinct topic number {i}"), 0.5)
            .with_constraint("query", json!(format!("topic-{i}")));
        let goal_id = ctx.goals.add(goal).unwrap();
        jobs.push(
            ctx.queue
                .enqueue("acme", Some(goal_id), JobPriority::Normal, json!({}), None)
                .unwrap(),
        );
    }

    let w1 = Worker::spawn(ctx.clone(), "w-1");
    let w2 = Worker::spawn(ctx.clone(), "w-2");
    let w3 = Worker::spawn(ctx.clone(), "w-3");
    for job_id in &jobs {
        assert_eq!(wait_terminal(ctx, *job_id).await, JobStatus::Succeeded);
    }
    w1.shutdown().await;
    w2.shutdown().await;
    w3.shutdown().await;

    // one search + one summarize per goal, no double execution
    telos_testing::assert_tool_called!(search, 6);
    let completed = ctx
        .goals
        .list(&telos_foundation::goals::GoalFilter {
            status: Some(GoalStatus::Completed),
            ..Default::default()
        })
        .len();
    assert_eq!(completed, 6);
}

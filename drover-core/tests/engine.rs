use std::sync::Arc;
use std::time::{Duration, Instant};

use drover_core::metrics::Outcome;
use drover_core::{
    AgentId, Engine, Error, Phase, PhaseReport, RunMode, Suite, Weight, WorkUnit, split_phase,
    split_phase_for_rebalancing_at,
};

fn engine(name: &str) -> Arc<Engine> {
    Arc::new(Engine::new(name).with_tick(Duration::from_millis(50)))
}

fn sleepy_phase(count: u64, sleep: &str, run_mode: RunMode) -> Phase {
    let suite = Suite::new(vec![
        WorkUnit::new("nap", "sleep", Weight::Count(count)).with_option("duration", sleep),
    ])
    .unwrap_or_else(|e| panic!("suite: {e}"));
    Phase::new("main", suite, run_mode).unwrap_or_else(|e| panic!("phase: {e}"))
}

fn only_shard(phase: &Phase, agent: &str) -> Phase {
    split_phase(phase, &[AgentId::from(agent)])
        .unwrap_or_else(|e| panic!("split: {e}"))
        .remove(&AgentId::from(agent))
        .unwrap_or_else(|| panic!("no shard for {agent}"))
}

async fn finish(handle: tokio::task::JoinHandle<drover_core::Result<PhaseReport>>) -> PhaseReport {
    handle
        .await
        .unwrap_or_else(|e| panic!("join: {e}"))
        .unwrap_or_else(|e| panic!("phase: {e}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn count_phase_runs_exactly_its_weight() {
    let phase = sleepy_phase(40, "1ms", RunMode::constant(4));
    let report = engine("x")
        .run_phase(only_shard(&phase, "x"))
        .await
        .unwrap_or_else(|e| panic!("run: {e}"));

    assert_eq!(report.recorded(), 40);
    assert_eq!(report.count(Outcome::Passed), 40);
    assert_eq!(report.counters.get("nap").copied(), Some(40));
    assert!(!report.interrupted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rebalance_mid_run_keeps_the_total() {
    let template = sleepy_phase(200, "5ms", RunMode::constant(4));
    let x = engine("x");
    let y = engine("y");

    let started = Instant::now();
    let running = x
        .start_phase(only_shard(&template, "x"))
        .await
        .unwrap_or_else(|e| panic!("start: {e}"));
    tokio::time::sleep(Duration::from_millis(40)).await;

    let executed = x.pause().await.unwrap_or_else(|e| panic!("pause: {e}"));
    let done = executed.get("nap").copied().unwrap_or(0);
    assert!(done > 0 && done < 200, "executed {done} before the pause");

    let mut shards = split_phase_for_rebalancing_at(
        &template,
        &[(AgentId::from("x"), executed)],
        &[AgentId::from("y")],
        started.elapsed(),
    )
    .unwrap_or_else(|e| panic!("rebalance: {e}"));
    let for_x = shards.remove(&AgentId::from("x")).unwrap_or_else(|| panic!("no shard for x"));
    let for_y = shards.remove(&AgentId::from("y")).unwrap_or_else(|| panic!("no shard for y"));

    x.resume(Some(for_x)).await.unwrap_or_else(|e| panic!("resume: {e}"));
    let joined = y.start_phase(for_y).await.unwrap_or_else(|e| panic!("start: {e}"));

    let rx = finish(running).await;
    let ry = finish(joined).await;

    assert_eq!(rx.recorded() + ry.recorded(), 200);
    let counted = rx.counters.get("nap").copied().unwrap_or(0) + ry.counters.get("nap").copied().unwrap_or(0);
    assert_eq!(counted, 200);
    assert!(ry.recorded() > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pause_then_plain_resume_continues() {
    let x = engine("x");
    let running = x
        .start_phase(only_shard(&sleepy_phase(30, "2ms", RunMode::constant(2)), "x"))
        .await
        .unwrap_or_else(|e| panic!("start: {e}"));

    tokio::time::sleep(Duration::from_millis(10)).await;
    let first = x.pause().await.unwrap_or_else(|e| panic!("pause: {e}"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = x.pause().await.unwrap_or_else(|e| panic!("pause: {e}"));
    assert_eq!(first, second);

    x.resume(None).await.unwrap_or_else(|e| panic!("resume: {e}"));
    assert!(matches!(x.resume(None).await, Err(Error::NotPaused)));

    let report = finish(running).await;
    assert_eq!(report.recorded(), 30);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn idle_engine_refuses_pause_and_resume() {
    let x = engine("x");
    assert!(!x.is_running());
    assert!(matches!(x.pause().await, Err(Error::PhaseNotRunning)));
    assert!(matches!(x.resume(None).await, Err(Error::NotPaused)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_phase_is_refused_while_running() {
    let x = engine("x");
    let phase = sleepy_phase(20, "5ms", RunMode::constant(1));
    let running = x
        .start_phase(only_shard(&phase, "x"))
        .await
        .unwrap_or_else(|e| panic!("start: {e}"));

    let again = x.start_phase(only_shard(&phase, "x")).await;
    assert!(matches!(again, Err(Error::PhaseRunning(a)) if a == "x"));

    finish(running).await;
    assert!(!x.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resume_rejects_a_shard_of_another_suite() {
    let x = engine("x");
    let running = x
        .start_phase(only_shard(&sleepy_phase(50, "5ms", RunMode::constant(1)), "x"))
        .await
        .unwrap_or_else(|e| panic!("start: {e}"));
    x.pause().await.unwrap_or_else(|e| panic!("pause: {e}"));

    let other = Suite::new(vec![WorkUnit::new("other", "noop", Weight::Count(1))])
        .unwrap_or_else(|e| panic!("suite: {e}"));
    let other = Phase::new("main", other, RunMode::constant(1)).unwrap_or_else(|e| panic!("phase: {e}"));
    assert!(matches!(x.resume(Some(other)).await, Err(Error::ShardMismatch)));

    // The failed resume already lifted the pause.
    x.stop().await;
    let report = finish(running).await;
    assert!(report.interrupted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_interrupts_in_flight_attempts() {
    let x = engine("x");
    let suite = Suite::new(vec![
        WorkUnit::new("long", "sleep", Weight::Unbounded).with_option("duration", "10s"),
    ])
    .unwrap_or_else(|e| panic!("suite: {e}"));
    let phase = Phase::new(
        "soak",
        suite,
        RunMode::constant(3).for_duration(Duration::from_secs(30)),
    )
    .unwrap_or_else(|e| panic!("phase: {e}"));

    let started = Instant::now();
    let running = x
        .start_phase(only_shard(&phase, "x"))
        .await
        .unwrap_or_else(|e| panic!("start: {e}"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    x.stop().await;

    let report = finish(running).await;
    assert!(report.interrupted);
    assert_eq!(report.count(Outcome::Interrupted), 3);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duration_phase_ends_on_time() {
    let suite = Suite::new(vec![WorkUnit::new("tick", "noop", Weight::Unbounded)])
        .unwrap_or_else(|e| panic!("suite: {e}"));
    let phase = Phase::new(
        "burst",
        suite,
        RunMode::constant(2).for_duration(Duration::from_millis(200)),
    )
    .unwrap_or_else(|e| panic!("phase: {e}"));

    let report = engine("x")
        .run_phase(only_shard(&phase, "x"))
        .await
        .unwrap_or_else(|e| panic!("run: {e}"));

    assert!(report.recorded() > 0);
    assert!(report.elapsed >= Duration::from_millis(150));
    assert!(report.elapsed < Duration::from_secs(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn throughput_phase_is_paced() {
    let suite = Suite::new(vec![WorkUnit::new("tick", "noop", Weight::Unbounded)])
        .unwrap_or_else(|e| panic!("suite: {e}"));
    let phase = Phase::new(
        "paced",
        suite,
        RunMode::throughput(4, 50).for_duration(Duration::from_secs(1)),
    )
    .unwrap_or_else(|e| panic!("phase: {e}"));

    let report = engine("x")
        .run_phase(only_shard(&phase, "x"))
        .await
        .unwrap_or_else(|e| panic!("run: {e}"));

    let n = report.recorded();
    assert!((20..=60).contains(&n), "recorded {n} at 50/s for 1s");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_task_kind_fails_to_start() {
    let suite = Suite::new(vec![WorkUnit::new("x", "warp-drive", Weight::Count(1))])
        .unwrap_or_else(|e| panic!("suite: {e}"));
    let phase = Phase::new("main", suite, RunMode::constant(1)).unwrap_or_else(|e| panic!("phase: {e}"));

    let x = engine("x");
    let err = x.start_phase(only_shard(&phase, "x")).await;
    assert!(matches!(err, Err(Error::UnknownTaskKind(k)) if k == "warp-drive"));
    assert!(!x.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn idle_shard_finishes_without_running_anything() {
    let phase = sleepy_phase(10, "1ms", RunMode::throughput(2, 1));
    let mut shards = split_phase(&phase, &[AgentId::from("x"), AgentId::from("y")])
        .unwrap_or_else(|e| panic!("split: {e}"));
    let idle = shards
        .remove(&AgentId::from("y"))
        .unwrap_or_else(|| panic!("no shard for y"));
    assert!(idle.run_mode().is_idle());

    let report = tokio::time::timeout(Duration::from_secs(2), engine("y").run_phase(idle))
        .await
        .unwrap_or_else(|_| panic!("idle shard did not finish"))
        .unwrap_or_else(|e| panic!("phase: {e}"));
    assert_eq!(report.recorded(), 0);
    assert_eq!(report.counters.get("nap").copied(), Some(0));
}

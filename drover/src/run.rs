use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drover_core::metrics::Outcome;
use drover_core::{
    AgentLink, DEFAULT_TICK, Driver, DriverHandle, Engine, LocalAgent, Phase, TaskRegistry,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::cli::{JoinSpec, RunArgs, TasksArgs};
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;
use crate::scenario;

/// Every agent started by this run, so an interrupt can reach the late joiners too.
#[derive(Debug, Default, Clone)]
struct Fleet {
    agents: Arc<Mutex<Vec<LocalAgent>>>,
}

impl Fleet {
    fn spawn(&self, tick: Duration) -> Arc<dyn AgentLink> {
        let mut agents = self.agents.lock();
        let agent = LocalAgent::new(Engine::new(format!("agent-{}", agents.len())).with_tick(tick));
        agents.push(agent.clone());
        Arc::new(agent)
    }

    async fn stop_all(&self) {
        let agents = self.agents.lock().clone();
        for agent in agents {
            if let Err(err) = agent.stop().await {
                tracing::warn!(agent = %agent.id(), error = %err, "stop failed");
            }
        }
    }
}

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let scenario = scenario::load(&args.scenario)
        .await
        .map_err(RunError::InvalidInput)?;
    let tick = args.tick.or(scenario.tick()).unwrap_or(DEFAULT_TICK);
    if tick.is_zero() {
        return Err(RunError::InvalidInput(anyhow::anyhow!("tick must be positive")));
    }
    let phases = scenario.into_phases().map_err(RunError::InvalidInput)?;
    check_task_kinds(&phases).map_err(RunError::InvalidInput)?;

    out.print_header(&args.scenario, &phases, args.agents);

    let fleet = Fleet::default();
    let mut driver = Driver::new().with_tick(tick);
    for _ in 0..args.agents {
        driver.add_agent(fleet.spawn(tick))?;
    }

    let joins = spawn_joins(driver.handle(), fleet.clone(), &args.joins, tick);
    let interrupted = Arc::new(AtomicBool::new(false));
    let ctrl_c = {
        let fleet = fleet.clone();
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted; stopping agents");
                interrupted.store(true, Ordering::Release);
                fleet.stop_all().await;
            }
        })
    };

    let mut failed_attempts = 0u64;
    let mut result = Ok(());
    for phase in phases {
        if interrupted.load(Ordering::Acquire) {
            tracing::info!(phase = %phase.name(), "skipping phase after interrupt");
            continue;
        }

        let outcome = match driver.run_phase(phase).await {
            Ok(outcome) => outcome,
            Err(err) => {
                result = Err(RunError::from(err));
                break;
            }
        };
        failed_attempts += outcome
            .statistics
            .values()
            .map(|s| s.count(Outcome::Failed))
            .sum::<u64>();

        if let Err(err) = out.print_phase(&outcome) {
            result = Err(RunError::RuntimeError(err));
            break;
        }
        if let Some((agent, err)) = outcome.failures.first() {
            result = Err(RunError::RuntimeError(anyhow::anyhow!(
                "phase `{}`: agent {agent} failed: {err}",
                outcome.phase
            )));
            break;
        }
    }

    joins.abort();
    ctrl_c.abort();
    fleet.stop_all().await;

    result?;
    if interrupted.load(Ordering::Acquire) {
        return Err(RunError::RuntimeError(anyhow::anyhow!("run interrupted")));
    }
    Ok(ExitCode::from_failed_attempts(failed_attempts))
}

pub fn tasks(args: TasksArgs) -> anyhow::Result<()> {
    let kinds: Vec<_> = TaskRegistry::global().kinds().collect();
    output::formatter(args.output).print_tasks(&kinds)
}

fn check_task_kinds(phases: &[Phase]) -> anyhow::Result<()> {
    let registry = TaskRegistry::global();
    for phase in phases {
        for unit in phase.suite().units() {
            if !registry.contains(unit.kind()) {
                anyhow::bail!(
                    "phase `{}`: unit `{}` has unknown task kind `{}`",
                    phase.name(),
                    unit.name(),
                    unit.kind()
                );
            }
        }
    }
    Ok(())
}

fn spawn_joins(handle: DriverHandle, fleet: Fleet, joins: &[JoinSpec], tick: Duration) -> JoinHandle<()> {
    let mut joins = joins.to_vec();
    joins.sort_by_key(|j| j.after);

    tokio::spawn(async move {
        let start = tokio::time::Instant::now();
        for join in joins {
            tokio::time::sleep_until(start + join.after).await;
            for _ in 0..join.count {
                let agent = fleet.spawn(tick);
                tracing::info!(agent = %agent.id(), "agent joining");
                if let Err(err) = handle.join(agent) {
                    tracing::warn!(error = %err, "driver stopped accepting agents");
                    return;
                }
            }
        }
    })
}

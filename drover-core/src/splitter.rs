//! Partitioning a phase across agents, and re-partitioning it when the fleet changes.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use crate::agent::AgentId;
use crate::counters::{CounterSnapshot, ExecutionCounters};
use crate::error::Result;
use crate::phase::{Phase, PhaseBound};
use crate::run_mode::{RunMode, validate_agents};
use crate::suite::Weight;

/// `total` split into `parts` shares differing by at most one; the first share carries the
/// remainder.
pub fn even_shares(total: u64, parts: usize) -> Vec<u64> {
    if parts == 0 {
        return Vec::new();
    }
    let parts_u64 = parts as u64;
    let base = total / parts_u64;
    let rem = total % parts_u64;

    let mut shares = vec![base; parts];
    shares[0] += rem;
    shares
}

fn split_weight(weight: Weight, parts: usize) -> Vec<Weight> {
    match weight {
        Weight::Count(n) => even_shares(n, parts).into_iter().map(Weight::Count).collect(),
        Weight::Unbounded => vec![Weight::Unbounded; parts],
    }
}

// Which agents can run attempts under their share of the pacing. With none, the first agent
// is treated as able so the work still has an owner.
fn runnable(agents: &[AgentId], modes: &HashMap<AgentId, RunMode>) -> Vec<bool> {
    let mut flags: Vec<bool> = agents
        .iter()
        .map(|a| modes.get(a).is_some_and(|m| !m.is_idle()))
        .collect();
    if !flags.contains(&true)
        && let Some(first) = flags.first_mut()
    {
        *first = true;
    }
    flags
}

// Splits `weight` over the runnable agents only; idle agents get a zero weight.
fn spread(weight: Weight, runnable: &[bool]) -> Vec<Weight> {
    let parts = runnable.iter().filter(|r| **r).count();
    let mut shares = split_weight(weight, parts).into_iter();
    runnable
        .iter()
        .map(|r| {
            if *r {
                shares.next().unwrap_or(Weight::Count(0))
            } else {
                Weight::Count(0)
            }
        })
        .collect()
}

// Transposes per-unit share lists into one weight list per agent.
fn per_agent_weights(per_unit: Vec<Vec<Weight>>, agents: usize) -> Vec<Vec<Weight>> {
    let mut out: Vec<Vec<Weight>> = (0..agents).map(|_| Vec::with_capacity(per_unit.len())).collect();
    for shares in per_unit {
        for (agent, w) in shares.into_iter().enumerate() {
            out[agent].push(w);
        }
    }
    out
}

/// One shard per agent with zeroed counters. `phase` is left untouched.
pub fn split_phase(phase: &Phase, agents: &[AgentId]) -> Result<HashMap<AgentId, Phase>> {
    validate_agents(agents)?;
    let mut modes = phase.run_mode().distribute(agents)?;
    let runnable = runnable(agents, &modes);

    let per_unit = phase
        .suite()
        .units()
        .iter()
        .map(|u| spread(u.weight(), &runnable))
        .collect();
    let weights = per_agent_weights(per_unit, agents.len());

    let mut shards = HashMap::with_capacity(agents.len());
    for (agent, weights) in agents.iter().zip(weights) {
        let Some(run_mode) = modes.remove(agent) else {
            continue;
        };
        let suite = phase.suite().reweighted(weights);
        let counters = ExecutionCounters::zeroed(&suite);
        shards.insert(agent.clone(), phase.shard(suite, run_mode, counters));
    }

    tracing::debug!(phase = %phase.name(), agents = agents.len(), "phase split");
    Ok(shards)
}

pub fn split_phase_for_rebalancing(
    phase: &Phase,
    existing: &[(AgentId, CounterSnapshot)],
    new: &[AgentId],
    phase_start: SystemTime,
) -> Result<HashMap<AgentId, Phase>> {
    let elapsed = SystemTime::now()
        .duration_since(phase_start)
        .unwrap_or(Duration::ZERO);
    split_phase_for_rebalancing_at(phase, existing, new, elapsed)
}

/// Re-splits what is left of `phase` across the running agents plus the joining ones.
///
/// `phase` is the driver's template: it carries the original weights, and its counters hold the
/// executions of agents that have already left the phase. `existing` carries the executed
/// counts of every agent still running, read while it was paused.
pub fn split_phase_for_rebalancing_at(
    phase: &Phase,
    existing: &[(AgentId, CounterSnapshot)],
    new: &[AgentId],
    elapsed: Duration,
) -> Result<HashMap<AgentId, Phase>> {
    let existing_ids: Vec<AgentId> = existing.iter().map(|(a, _)| a.clone()).collect();
    let agents: Vec<AgentId> = existing_ids.iter().chain(new).cloned().collect();
    validate_agents(&agents)?;

    let mut modes = phase
        .run_mode()
        .distribute_for_rebalancing_at(&existing_ids, new, elapsed)?;
    let runnable = runnable(&agents, &modes);

    let retired = phase.counters().snapshot();
    let per_unit = phase
        .suite()
        .units()
        .iter()
        .map(|u| match (phase.bound(), u.weight()) {
            (PhaseBound::Iterations, Weight::Count(total)) => {
                let executed: u64 = existing
                    .iter()
                    .filter_map(|(_, snap)| snap.get(u.name()))
                    .sum();
                let done = retired.get(u.name()).copied().unwrap_or(0) + executed;
                spread(Weight::Count(total.saturating_sub(done)), &runnable)
            }
            (_, weight) => spread(weight, &runnable),
        })
        .collect();
    let weights = per_agent_weights(per_unit, agents.len());

    let empty = CounterSnapshot::new();
    let mut shards = HashMap::with_capacity(agents.len());
    for (idx, (agent, weights)) in agents.iter().zip(weights).enumerate() {
        let Some(run_mode) = modes.remove(agent) else {
            continue;
        };
        let suite = phase.suite().reweighted(weights);
        let from = existing.get(idx).map(|(_, snap)| snap).unwrap_or(&empty);
        let counters = ExecutionCounters::resumed(&suite, from);
        shards.insert(agent.clone(), phase.shard(suite, run_mode, counters));
    }

    tracing::info!(
        phase = %phase.name(),
        existing = existing.len(),
        joining = new.len(),
        "phase rebalanced"
    );
    Ok(shards)
}

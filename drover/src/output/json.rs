use std::io::Write as _;
use std::path::Path;

use drover_core::metrics::AggregatedResults;
use drover_core::{CounterSnapshot, Phase, PhaseOutcome, PropertyDoc};
use serde::Serialize;

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _scenario_path: &Path, _phases: &[Phase], _agents: u64) {}

    fn print_phase(&self, outcome: &PhaseOutcome) -> anyhow::Result<()> {
        emit_json_line(&build_phase_line(outcome))
    }

    fn print_tasks(&self, kinds: &[(&'static str, Vec<PropertyDoc>)]) -> anyhow::Result<()> {
        for (kind, options) in kinds {
            emit_json_line(&JsonTaskLine {
                kind: "task",
                name: kind,
                options,
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonPhaseLine<'a> {
    pub kind: &'static str,
    pub phase: &'a str,
    pub elapsed_secs: f64,
    pub agents: usize,
    pub rebalances: u64,
    pub recorded: u64,
    pub counters: &'a CounterSnapshot,
    pub results: &'a AggregatedResults,
    pub failures: Vec<JsonAgentFailure>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonAgentFailure {
    pub agent: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
struct JsonTaskLine<'a> {
    kind: &'static str,
    name: &'a str,
    options: &'a [PropertyDoc],
}

fn build_phase_line(outcome: &PhaseOutcome) -> JsonPhaseLine<'_> {
    JsonPhaseLine {
        kind: "phase",
        phase: &outcome.phase,
        elapsed_secs: outcome.elapsed.as_secs_f64(),
        agents: outcome.reports.len(),
        rebalances: outcome.rebalances,
        recorded: outcome.recorded(),
        counters: &outcome.counters,
        results: &outcome.results,
        failures: outcome
            .failures
            .iter()
            .map(|(agent, err)| JsonAgentFailure {
                agent: agent.to_string(),
                error: err.to_string(),
            })
            .collect(),
    }
}

fn emit_json_line<T: Serialize>(line: &T) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer(&mut out, line)?;
    writeln!(out)?;
    Ok(())
}

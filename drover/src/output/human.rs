use std::io::Write as _;
use std::path::Path;
use std::time::Duration;

use drover_core::{Pacing, Phase, PhaseBound, PhaseOutcome, PropertyDoc, RunMode};

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput;

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, scenario_path: &Path, phases: &[Phase], agents: u64) {
        println!("scenario: {} agents={agents}", scenario_path.display());
        for p in phases {
            println!(
                "phase: {} bound={} run_mode={} units={}",
                p.name(),
                format_bound(p.bound()),
                format_run_mode(p.run_mode()),
                p.suite().len()
            );
        }
        if !phases.is_empty() {
            println!();
        }
    }

    fn print_phase(&self, outcome: &PhaseOutcome) -> anyhow::Result<()> {
        let mut out = std::io::stdout().lock();
        writeln!(
            out,
            "phase {} finished in {} (agents={}, rebalances={})",
            outcome.phase,
            format_duration_single(outcome.elapsed),
            outcome.reports.len(),
            outcome.rebalances
        )?;

        let width = outcome.results.keys().map(|k| k.len()).max().unwrap_or(0);
        for (unit, metrics) in &outcome.results {
            let values = metrics
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(out, "  {unit:<width$}  {values}")?;
        }
        for (agent, err) in &outcome.failures {
            writeln!(out, "  agent {agent} failed: {err}")?;
        }
        writeln!(out)?;
        Ok(())
    }

    fn print_tasks(&self, kinds: &[(&'static str, Vec<PropertyDoc>)]) -> anyhow::Result<()> {
        let mut out = std::io::stdout().lock();
        for (kind, props) in kinds {
            writeln!(out, "{kind}")?;
            if props.is_empty() {
                writeln!(out, "  (no options)")?;
            }
            for p in props {
                let requirement = match (p.required, p.default) {
                    (true, _) => "required".to_string(),
                    (false, Some(d)) => format!("default {d}"),
                    (false, None) => "optional".to_string(),
                };
                writeln!(out, "  {:<12} {} ({requirement})", p.name, p.description)?;
            }
        }
        Ok(())
    }
}

fn format_bound(bound: PhaseBound) -> String {
    match bound {
        PhaseBound::Duration(d) => humantime::format_duration(d).to_string(),
        PhaseBound::Iterations => "iterations".to_string(),
    }
}

fn format_run_mode(mode: &RunMode) -> String {
    match mode.pacing() {
        Pacing::Constant { workers } => format!("constant(workers={workers})"),
        Pacing::Throughput { workers, rate } => {
            format!("throughput(workers={workers}, rate={rate}/s)")
        }
        Pacing::Unbounded => format!("unbounded(workers={})", mode.workers()),
    }
}

pub(crate) fn format_duration_single(d: Duration) -> String {
    // Single rounded component in one of: us, ms, s.
    let total_ns = d.as_nanos();

    const NS_PER_US: u128 = 1_000;
    const NS_PER_MS: u128 = 1_000_000;
    const NS_PER_S: u128 = 1_000_000_000;

    fn round_div(value: u128, unit: u128) -> u128 {
        (value + (unit / 2)) / unit
    }

    if total_ns >= NS_PER_S {
        return format!("{}s", round_div(total_ns, NS_PER_S));
    }
    if total_ns >= NS_PER_MS {
        return format!("{}ms", round_div(total_ns, NS_PER_MS));
    }
    format!("{}us", round_div(total_ns, NS_PER_US))
}

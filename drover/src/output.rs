use crate::cli::OutputFormat;
use drover_core::{Phase, PhaseOutcome, PropertyDoc};
use std::path::Path;

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, scenario_path: &Path, phases: &[Phase], agents: u64);
    fn print_phase(&self, outcome: &PhaseOutcome) -> anyhow::Result<()>;
    fn print_tasks(&self, kinds: &[(&'static str, Vec<PropertyDoc>)]) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}

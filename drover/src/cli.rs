use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }
    // A bare number means seconds.
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s)
        .map_err(|_| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"))
}

/// `--join AFTER:COUNT`: `COUNT` agents join the fleet `AFTER` the run started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinSpec {
    pub after: Duration,
    pub count: u64,
}

fn parse_join(input: &str) -> Result<JoinSpec, String> {
    let (after, count) = input
        .split_once(':')
        .ok_or_else(|| format!("invalid join '{input}' (expected AFTER:COUNT, e.g. 5s:2)"))?;
    let after = parse_duration(after)?;
    let count: u64 = count
        .trim()
        .parse()
        .map_err(|_| format!("invalid agent count '{count}' in join '{input}'"))?;
    if count == 0 {
        return Err(format!("join '{input}' adds no agents"));
    }
    Ok(JoinSpec { after, count })
}

fn parse_agents(input: &str) -> Result<u64, String> {
    match input.trim().parse::<u64>() {
        Ok(0) => Err("at least one agent is required".to_string()),
        Ok(n) => Ok(n),
        Err(_) => Err(format!("invalid agent count '{input}'")),
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary.
    HumanReadable,
    /// Emit one JSON object per phase (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "drover",
    author,
    version,
    about = "Distributed load generation over a fleet of agents",
    long_about = "drover runs phases of weighted work units across a fleet of agents.\n\nEach phase is split across the agents; agents joining or leaving mid-phase get the remaining work re-split between them. Results are aggregated per work unit and published while the phase runs.",
    after_help = "Examples:\n  drover run scenario.yaml\n  drover run scenario.yaml --agents 4 --join 5s:2\n  drover run scenario.yaml --output json\n  drover tasks"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every phase of a scenario file
    Run(RunArgs),

    /// List the built-in task kinds and their options
    Tasks(TasksArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the scenario (.yaml)
    pub scenario: PathBuf,

    /// Number of in-process agents the fleet starts with
    #[arg(long, env = "DROVER_AGENTS", default_value = "1", value_parser = parse_agents)]
    pub agents: u64,

    /// Agents joining mid-run (repeatable, AFTER:COUNT, e.g. 5s:2)
    #[arg(long = "join", value_name = "AFTER:COUNT", value_parser = parse_join)]
    pub joins: Vec<JoinSpec>,

    /// Aggregation tick; overrides the scenario's `tick`
    #[arg(long, env = "DROVER_TICK", value_parser = parse_duration)]
    pub tick: Option<Duration>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct TasksArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_common_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("3"), Ok(Duration::from_secs(3)));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn parse_join_reads_after_and_count() {
        assert_eq!(
            parse_join("5s:2"),
            Ok(JoinSpec {
                after: Duration::from_secs(5),
                count: 2
            })
        );
        assert!(parse_join("5s").is_err());
        assert!(parse_join("5s:0").is_err());
        assert!(parse_join("soon:1").is_err());
    }

    #[test]
    fn cli_parses_run() {
        let parsed = Cli::try_parse_from([
            "drover",
            "run",
            "scenario.yaml",
            "--agents",
            "3",
            "--join",
            "1s:1",
            "--join",
            "250ms:2",
            "--tick",
            "500ms",
            "--output",
            "json",
        ]);

        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.scenario, PathBuf::from("scenario.yaml"));
                assert_eq!(args.agents, 3);
                assert_eq!(args.joins.len(), 2);
                assert_eq!(args.joins[1].after, Duration::from_millis(250));
                assert_eq!(args.tick, Some(Duration::from_millis(500)));
                assert!(matches!(args.output, OutputFormat::Json));
            }
            Command::Tasks(_) => panic!("expected run command"),
        }
    }

    #[test]
    fn cli_rejects_an_empty_fleet() {
        assert!(Cli::try_parse_from(["drover", "run", "s.yaml", "--agents", "0"]).is_err());
    }
}

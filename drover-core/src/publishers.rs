//! Built-in publishers: structured log lines and newline-delimited JSON files.

use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use drover_metrics::{AggregatedResults, TestResult};
use parking_lot::Mutex;
use serde::Serialize;

use crate::agent::AgentId;
use crate::error::{Error, Result};
use crate::publish::Publisher;

fn render(results: &AggregatedResults) -> Vec<String> {
    results
        .iter()
        .map(|(unit, metrics)| {
            let values = metrics
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            format!("{unit}: {values}")
        })
        .collect()
}

/// Emits one `tracing` event per work unit.
#[derive(Debug, Default)]
pub struct TracingPublisher;

#[async_trait]
impl Publisher for TracingPublisher {
    fn name(&self) -> &str {
        "log"
    }

    async fn publish_intermediate(
        &self,
        phase: &str,
        agent: &AgentId,
        results: &AggregatedResults,
    ) -> Result<()> {
        for line in render(results) {
            tracing::info!(phase, agent = %agent, "{line}");
        }
        Ok(())
    }

    async fn publish_final(&self, phase: &str, results: &AggregatedResults) -> Result<()> {
        for line in render(results) {
            tracing::info!(phase, "final {line}");
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct JsonLine<'a, T: Serialize> {
    kind: &'static str,
    phase: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent: Option<&'a str>,
    results: &'a T,
}

/// Appends one JSON object per publish to a file.
#[derive(Debug)]
pub struct JsonLinesPublisher {
    path: PathBuf,
    raw: bool,
    out: Mutex<BufWriter<File>>,
}

impl JsonLinesPublisher {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        Ok(Self {
            path,
            raw: false,
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Also writes every individual attempt.
    #[must_use]
    pub fn with_raw(mut self) -> Self {
        self.raw = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write<T: Serialize>(&self, line: &JsonLine<'_, T>) -> Result<()> {
        let mut out = self.out.lock();
        serde_json::to_writer(&mut *out, line).map_err(|err| Error::Publisher {
            name: self.path.display().to_string(),
            message: err.to_string(),
        })?;
        writeln!(out)?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for JsonLinesPublisher {
    fn name(&self) -> &str {
        "json"
    }

    fn wants_raw(&self) -> bool {
        self.raw
    }

    async fn publish_raw(&self, phase: &str, agent: &AgentId, results: &[TestResult]) -> Result<()> {
        self.write(&JsonLine {
            kind: "raw",
            phase,
            agent: Some(agent.as_str()),
            results: &results,
        })
    }

    async fn publish_intermediate(
        &self,
        phase: &str,
        agent: &AgentId,
        results: &AggregatedResults,
    ) -> Result<()> {
        self.write(&JsonLine {
            kind: "intermediate",
            phase,
            agent: Some(agent.as_str()),
            results,
        })
    }

    async fn publish_final(&self, phase: &str, results: &AggregatedResults) -> Result<()> {
        self.write(&JsonLine {
            kind: "final",
            phase,
            agent: None,
            results,
        })
    }

    async fn finish(&self) -> Result<()> {
        self.out.lock().flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use drover_metrics::{MetricSet, Outcome, StatisticsMap, TestStatistics};

    use super::*;

    fn results() -> AggregatedResults {
        let mut stats = TestStatistics::new();
        stats.push(&TestResult::new(
            Arc::from("home"),
            Outcome::Passed,
            std::time::Duration::from_millis(4),
        ));
        let map = StatisticsMap::from([(Arc::<str>::from("home"), stats)]);
        MetricSet::defaults().aggregate(&map)
    }

    #[tokio::test]
    async fn json_lines_are_flushed_on_finish() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let path = dir.path().join("nested").join("out.ndjson");
        let publisher = JsonLinesPublisher::create(&path).unwrap_or_else(|e| panic!("create: {e}"));

        let agent = AgentId::from("agent-0");
        publisher
            .publish_intermediate("warmup", &agent, &results())
            .await
            .unwrap_or_else(|e| panic!("publish: {e}"));
        publisher
            .publish_final("warmup", &AggregatedResults::new())
            .await
            .unwrap_or_else(|e| panic!("publish: {e}"));
        publisher.finish().await.unwrap_or_else(|e| panic!("finish: {e}"));

        let text = std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("read: {e}"));
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap_or_else(|e| panic!("json: {e}")))
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "intermediate");
        assert_eq!(lines[0]["agent"], "agent-0");
        assert_eq!(lines[0]["results"]["home"][0]["name"], "passed");
        assert_eq!(lines[0]["results"]["home"][0]["value"], 1.0);
        assert_eq!(lines[1]["kind"], "final");
        assert!(lines[1].get("agent").is_none());
    }

    #[test]
    fn render_lists_each_unit() {
        let lines = render(&results());
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("home: passed=1 "));
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use drover_core::metrics::{Metric, MetricSet};
use drover_core::{
    JsonLinesPublisher, Phase, PublishMode, Publisher, RunMode, Suite, TaskConfig,
    TracingPublisher, Weight, WorkUnit,
};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ScenarioYaml {
    /// Aggregation tick shared by every phase.
    #[serde(default)]
    pub tick: Option<YamlDuration>,

    pub phases: Vec<PhaseYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct PhaseYaml {
    pub name: String,

    /// Omitted for a count-bound phase.
    #[serde(default)]
    pub duration: Option<YamlDuration>,

    pub run_mode: RunModeYaml,

    #[serde(default)]
    pub publish: PublishYaml,

    /// Metric spellings as accepted by `Metric::from_str`; defaults when omitted.
    #[serde(default)]
    pub metrics: Option<Vec<String>>,

    #[serde(default)]
    pub publishers: Vec<PublisherYaml>,

    pub suite: Vec<UnitYaml>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub(crate) enum RunModeYaml {
    Constant { workers: u64 },
    Throughput { workers: u64, rate: u64 },
    Unbounded,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum PublishYaml {
    #[default]
    Simple,
    Intervals(YamlDuration),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum PublisherYaml {
    Log,
    Json(JsonSinkYaml),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum JsonSinkYaml {
    Path(PathBuf),
    Detailed {
        path: PathBuf,
        #[serde(default)]
        raw: bool,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct UnitYaml {
    pub name: String,
    pub kind: String,

    /// Executions owed in a count-bound phase; omitted means unbounded.
    #[serde(default)]
    pub count: Option<u64>,

    #[serde(default)]
    pub config: TaskConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    pub(crate) fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> serde::de::Visitor<'de> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v <= 0 {
                    return Err(E::custom("duration must be positive"));
                }
                Ok(YamlDuration(Duration::from_secs(v as u64)))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v <= 0.0 {
                    return Err(E::custom("duration must be a positive, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

impl RunModeYaml {
    fn into_run_mode(self, duration: Option<Duration>) -> RunMode {
        let mode = match self {
            Self::Constant { workers } => RunMode::constant(workers),
            Self::Throughput { workers, rate } => RunMode::throughput(workers, rate),
            Self::Unbounded => RunMode::unbounded(),
        };
        match duration {
            Some(d) => mode.for_duration(d),
            None => mode,
        }
    }
}

impl From<PublishYaml> for PublishMode {
    fn from(value: PublishYaml) -> Self {
        match value {
            PublishYaml::Simple => PublishMode::Simple,
            PublishYaml::Intervals(d) => PublishMode::Intervals(d.into_inner()),
        }
    }
}

impl PublisherYaml {
    fn build(&self) -> anyhow::Result<Arc<dyn Publisher>> {
        let publisher: Arc<dyn Publisher> = match self {
            Self::Log => Arc::new(TracingPublisher),
            Self::Json(JsonSinkYaml::Path(path)) => Arc::new(create_json(path)?),
            Self::Json(JsonSinkYaml::Detailed { path, raw }) => {
                let publisher = create_json(path)?;
                Arc::new(if *raw { publisher.with_raw() } else { publisher })
            }
        };
        Ok(publisher)
    }
}

fn create_json(path: &Path) -> anyhow::Result<JsonLinesPublisher> {
    JsonLinesPublisher::create(path)
        .with_context(|| format!("failed to create json output: {}", path.display()))
}

impl PhaseYaml {
    fn metric_set(&self) -> anyhow::Result<MetricSet> {
        let Some(specs) = &self.metrics else {
            return Ok(MetricSet::defaults());
        };
        specs
            .iter()
            .map(|s| {
                s.parse::<Metric>()
                    .with_context(|| format!("phase `{}`: bad metric `{s}`", self.name))
            })
            .collect()
    }

    fn suite(&self) -> anyhow::Result<Suite> {
        let units = self
            .suite
            .iter()
            .map(|u| {
                let weight = u.count.map_or(Weight::Unbounded, Weight::Count);
                WorkUnit::new(u.name.as_str(), u.kind.as_str(), weight).with_config(u.config.clone())
            })
            .collect();
        Suite::new(units).with_context(|| format!("phase `{}`: invalid suite", self.name))
    }

    pub(crate) fn into_phase(self) -> anyhow::Result<Phase> {
        let suite = self.suite()?;
        let metrics = self.metric_set()?;
        let run_mode = self
            .run_mode
            .into_run_mode(self.duration.map(YamlDuration::into_inner));

        let mut phase = Phase::new(self.name.as_str(), suite, run_mode)
            .with_context(|| format!("phase `{}`", self.name))?
            .with_publish_mode(self.publish.into())
            .with_metrics(metrics);
        for p in &self.publishers {
            phase = phase.with_publisher(p.build()?);
        }
        Ok(phase)
    }
}

impl ScenarioYaml {
    pub(crate) fn parse(text: &str) -> anyhow::Result<Self> {
        let scenario: Self = serde_yaml::from_str(text).context("failed to parse scenario")?;
        if scenario.phases.is_empty() {
            anyhow::bail!("scenario has no phases");
        }
        Ok(scenario)
    }

    pub(crate) fn tick(&self) -> Option<Duration> {
        self.tick.map(YamlDuration::into_inner)
    }

    /// Builds every phase up front so a bad phase fails the run before anything executes.
    pub(crate) fn into_phases(self) -> anyhow::Result<Vec<Phase>> {
        self.phases.into_iter().map(PhaseYaml::into_phase).collect()
    }
}

pub(crate) async fn load(path: &Path) -> anyhow::Result<ScenarioYaml> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read scenario: {}", path.display()))?;
    ScenarioYaml::parse(&text).with_context(|| path.display().to_string())
}

use std::sync::Arc;

use async_trait::async_trait;
use serde_yaml::Value;

use crate::error::Result;
use crate::registry::TaskRegistry;
use crate::schema::{Property, Schema};
use crate::suite::{TaskConfig, Weight, WorkUnit};
use crate::task::{AttemptContext, AttemptError, AttemptResult, Task};

#[derive(Debug, Clone, PartialEq, Default, serde::Deserialize, serde::Serialize)]
pub struct Step {
    pub kind: String,
    #[serde(default)]
    pub config: TaskConfig,
}

#[derive(Debug, Default)]
pub(super) struct Steps(Vec<Step>);

pub(super) static SCHEMA: Schema<Steps> = Schema::new(
    "sequence",
    &[Property {
        name: "steps",
        description: "child tasks run in order; stops at the first that does not pass",
        required: true,
        default: None,
        set: |s, v| {
            s.0 = serde_yaml::from_value(v.clone()).map_err(|e| e.to_string())?;
            if s.0.is_empty() {
                return Err("expected at least one step".to_string());
            }
            Ok(())
        },
        get: |s| serde_yaml::to_value(&s.0).unwrap_or(Value::Null),
    }],
);

/// Composite task: one attempt runs every step in order.
#[derive(Debug)]
pub struct Sequence {
    steps: Vec<Arc<dyn Task>>,
}

impl Sequence {
    pub fn new(steps: Vec<Arc<dyn Task>>) -> Self {
        Self { steps }
    }
}

#[async_trait]
impl Task for Sequence {
    async fn execute(&self, _ctx: &mut AttemptContext) -> AttemptResult {
        Err(AttemptError::failed("sequence has no steps"))
    }

    fn children(&self) -> &[Arc<dyn Task>] {
        &self.steps
    }
}

pub(super) fn build(unit: &WorkUnit, registry: &TaskRegistry) -> Result<Arc<dyn Task>> {
    let Steps(steps) = SCHEMA.bind(unit)?;
    let children = steps
        .into_iter()
        .enumerate()
        .map(|(idx, step)| {
            let child = WorkUnit::new(
                format!("{}[{idx}]", unit.name()),
                step.kind,
                Weight::Count(1),
            )
            .with_config(step.config);
            registry.build(&child)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Arc::new(Sequence::new(children)))
}

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_yaml::Value;

use crate::error::Result;
use crate::registry::TaskRegistry;
use crate::schema::{Property, Schema, u64_value};
use crate::suite::WorkUnit;
use crate::task::{AttemptContext, AttemptError, AttemptResult, Task};

/// Fails every `fail_every`-th call and skips every `skip_every`-th call, counted across all
/// workers. Zero disables either behaviour; failing wins when both apply.
#[derive(Debug, Default)]
pub struct Flaky {
    pub fail_every: u64,
    pub skip_every: u64,
    calls: AtomicU64,
}

pub(super) static SCHEMA: Schema<Flaky> = Schema::new(
    "flaky",
    &[
        Property {
            name: "fail_every",
            description: "fail every n-th attempt (0 = never)",
            required: false,
            default: Some("0"),
            set: |f, v| {
                f.fail_every = u64_value(v)?;
                Ok(())
            },
            get: |f| Value::from(f.fail_every),
        },
        Property {
            name: "skip_every",
            description: "skip every n-th attempt (0 = never)",
            required: false,
            default: Some("0"),
            set: |f, v| {
                f.skip_every = u64_value(v)?;
                Ok(())
            },
            get: |f| Value::from(f.skip_every),
        },
    ],
);

fn hits(n: u64, every: u64) -> bool {
    every != 0 && n % every == 0
}

#[async_trait]
impl Task for Flaky {
    async fn execute(&self, _ctx: &mut AttemptContext) -> AttemptResult {
        let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if hits(n, self.fail_every) {
            return Err(AttemptError::failed(format!("call {n} failed on purpose")));
        }
        if hits(n, self.skip_every) {
            return Err(AttemptError::skipped(format!("call {n} skipped on purpose")));
        }
        Ok(())
    }
}

pub(super) fn build(unit: &WorkUnit, _registry: &TaskRegistry) -> Result<Arc<dyn Task>> {
    Ok(Arc::new(SCHEMA.bind(unit)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::Weight;
    use drover_metrics::Outcome::{Failed, Skipped};

    #[tokio::test]
    async fn fails_and_skips_on_schedule() {
        let unit = WorkUnit::new("f", "flaky", Weight::Count(1))
            .with_option("fail_every", 3u64)
            .with_option("skip_every", 2u64);
        let flaky = SCHEMA.bind(&unit).unwrap_or_else(|e| panic!("bind: {e}"));
        let mut ctx = AttemptContext::new(0, 0, Arc::from("f"));

        let mut outcomes = Vec::new();
        for _ in 0..6 {
            outcomes.push(flaky.execute(&mut ctx).await.map_err(|e| e.outcome()));
        }

        assert_eq!(
            outcomes,
            vec![Ok(()), Err(Skipped), Err(Failed), Err(Skipped), Ok(()), Err(Failed)]
        );
    }
}

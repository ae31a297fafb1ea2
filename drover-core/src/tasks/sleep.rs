use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::Result;
use crate::registry::TaskRegistry;
use crate::schema::{Property, Schema, duration_to_value, duration_value};
use crate::suite::WorkUnit;
use crate::task::{AttemptContext, AttemptResult, Task};

/// Waits for `duration`, plus up to `jitter` extra.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Sleep {
    pub duration: Duration,
    pub jitter: Duration,
}

pub(super) static SCHEMA: Schema<Sleep> = Schema::new(
    "sleep",
    &[
        Property {
            name: "duration",
            description: "how long each attempt sleeps",
            required: true,
            default: None,
            set: |s, v| {
                s.duration = duration_value(v)?;
                Ok(())
            },
            get: |s| duration_to_value(s.duration),
        },
        Property {
            name: "jitter",
            description: "upper bound of a random extra delay",
            required: false,
            default: Some("0ms"),
            set: |s, v| {
                s.jitter = duration_value(v)?;
                Ok(())
            },
            get: |s| duration_to_value(s.jitter),
        },
    ],
);

impl Sleep {
    fn delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.duration;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_micros() as u64);
        self.duration + Duration::from_micros(extra)
    }
}

#[async_trait]
impl Task for Sleep {
    async fn execute(&self, _ctx: &mut AttemptContext) -> AttemptResult {
        let delay = self.delay();
        tokio::time::sleep(delay).await;
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

    #[test]
    fn delay_stays_within_jitter() {
        let sleep = Sleep {
            duration: Duration::from_millis(10),
            jitter: Duration::from_millis(5),
        };
        for _ in 0..100 {
            let d = sleep.delay();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(15));
        }
    }

    #[test]
    fn binds_from_config() {
        let unit = WorkUnit::new("s", "sleep", Weight::Count(1)).with_option("duration", "2ms");
        let sleep = SCHEMA.bind(&unit).unwrap_or_else(|e| panic!("bind: {e}"));
        assert_eq!(sleep.duration, Duration::from_millis(2));
        assert_eq!(sleep.jitter, Duration::ZERO);
    }
}

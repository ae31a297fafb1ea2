use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::registry::TaskRegistry;
use crate::suite::WorkUnit;
use crate::task::{AttemptContext, AttemptResult, Task};

/// Does nothing; measures the engine's own overhead.
#[derive(Debug, Default)]
pub struct Noop;

#[async_trait]
impl Task for Noop {
    async fn execute(&self, _ctx: &mut AttemptContext) -> AttemptResult {
        Ok(())
    }
}

pub(super) fn build(unit: &WorkUnit, _registry: &TaskRegistry) -> Result<Arc<dyn Task>> {
    if let Some(key) = unit.config().keys().next() {
        return Err(Error::config(
            &**unit.name(),
            format!("unknown option `{key}` for task kind `noop`"),
        ));
    }
    Ok(Arc::new(Noop))
}

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};
use crate::schema::PropertyDoc;
use crate::suite::WorkUnit;
use crate::task::Task;
use crate::tasks;

/// Builds a task for one work unit. The registry is passed along so composite kinds can build
/// their children.
pub type TaskFactory = fn(&WorkUnit, &TaskRegistry) -> Result<Arc<dyn Task>>;

#[derive(Debug, Clone, Copy)]
pub struct TaskKind {
    pub build: TaskFactory,
    pub docs: fn() -> Vec<PropertyDoc>,
}

/// Task kinds by name.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    kinds: BTreeMap<&'static str, TaskKind>,
}

static GLOBAL: OnceLock<Arc<TaskRegistry>> = OnceLock::new();

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `noop`, `sleep`, `flaky` and `sequence`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        tasks::register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, name: &'static str, kind: TaskKind) -> &mut Self {
        self.kinds.insert(name, kind);
        self
    }

    pub fn build(&self, unit: &WorkUnit) -> Result<Arc<dyn Task>> {
        let kind = self
            .kinds
            .get(unit.kind())
            .ok_or_else(|| Error::UnknownTaskKind(unit.kind().to_string()))?;
        (kind.build)(unit, self)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = (&'static str, Vec<PropertyDoc>)> + '_ {
        self.kinds.iter().map(|(name, kind)| (*name, (kind.docs)()))
    }

    /// Makes `registry` the process-wide registry. Only the first call succeeds.
    pub fn install(registry: TaskRegistry) -> Result<()> {
        GLOBAL
            .set(Arc::new(registry))
            .map_err(|_| Error::RegistryInstalled)
    }

    /// The installed registry, or the built-in one if nothing was installed.
    pub fn global() -> Arc<TaskRegistry> {
        GLOBAL
            .get_or_init(|| Arc::new(TaskRegistry::with_builtins()))
            .clone()
    }
}

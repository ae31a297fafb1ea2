use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Kind-specific configuration of a work unit, bound by the task's schema.
pub type TaskConfig = BTreeMap<String, serde_yaml::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weight {
    /// Target number of executions.
    Count(u64),
    Unbounded,
}

impl Weight {
    pub fn count(self) -> Option<u64> {
        match self {
            Self::Count(n) => Some(n),
            Self::Unbounded => None,
        }
    }

    /// Relative share used when picking the next unit; unbounded units weigh as one.
    pub fn selection_weight(self) -> u64 {
        match self {
            Self::Count(n) => n,
            Self::Unbounded => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkUnit {
    name: Arc<str>,
    kind: Arc<str>,
    weight: Weight,
    config: TaskConfig,
}

impl WorkUnit {
    pub fn new(name: impl Into<Arc<str>>, kind: impl Into<Arc<str>>, weight: Weight) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            weight,
            config: TaskConfig::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_option(mut self, key: &str, value: impl Into<serde_yaml::Value>) -> Self {
        self.config.insert(key.to_string(), value.into());
        self
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn weight(&self) -> Weight {
        self.weight
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    fn reweighted(&self, weight: Weight) -> Self {
        Self {
            weight,
            ..self.clone()
        }
    }
}

/// Weighted set of uniquely named work units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Suite {
    units: Vec<WorkUnit>,
}

impl Suite {
    pub fn new(units: Vec<WorkUnit>) -> Result<Self> {
        if units.is_empty() {
            return Err(Error::EmptySuite);
        }

        let mut seen = HashSet::with_capacity(units.len());
        for unit in &units {
            if !seen.insert(unit.name.clone()) {
                return Err(Error::DuplicateWorkUnit(unit.name.to_string()));
            }
        }

        Ok(Self { units })
    }

    pub fn units(&self) -> &[WorkUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&WorkUnit> {
        self.units.iter().find(|u| &*u.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &Arc<str>> {
        self.units.iter().map(|u| &u.name)
    }

    /// Sum of all finite weights.
    pub fn total_weight(&self) -> u64 {
        self.units.iter().filter_map(|u| u.weight.count()).sum()
    }

    pub fn first_unbounded(&self) -> Option<&WorkUnit> {
        self.units.iter().find(|u| u.weight == Weight::Unbounded)
    }

    /// Deep copy with one new weight per unit, in suite order.
    pub(crate) fn reweighted(&self, weights: impl IntoIterator<Item = Weight>) -> Self {
        Self {
            units: self
                .units
                .iter()
                .zip(weights)
                .map(|(u, w)| u.reweighted(w))
                .collect(),
        }
    }

    pub(crate) fn same_units(&self, other: &Suite) -> bool {
        self.units.len() == other.units.len()
            && self
                .units
                .iter()
                .zip(&other.units)
                .all(|(a, b)| a.name == b.name && a.kind == b.kind)
    }
}

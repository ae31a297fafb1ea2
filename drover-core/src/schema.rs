//! Declarative binding of a work unit's `config` map onto a typed task configuration.

use std::time::Duration;

use serde::Serialize;
use serde_yaml::Value;

use crate::error::{Error, Result};
use crate::suite::{TaskConfig, WorkUnit};

pub type Setter<T> = fn(&mut T, &Value) -> std::result::Result<(), String>;
pub type Getter<T> = fn(&T) -> Value;

/// One configurable field of a task kind.
pub struct Property<T: 'static> {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
    /// YAML spelling of the value used when the key is absent.
    pub default: Option<&'static str>,
    pub set: Setter<T>,
    pub get: Getter<T>,
}

/// Human-facing summary of a property, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyDoc {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
    pub default: Option<&'static str>,
}

pub struct Schema<T: 'static> {
    kind: &'static str,
    properties: &'static [Property<T>],
}

impl<T: Default> Schema<T> {
    pub const fn new(kind: &'static str, properties: &'static [Property<T>]) -> Self {
        Self { kind, properties }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Builds a `T` from `unit`'s config: unknown keys and missing required keys are errors,
    /// absent optional keys take their default.
    pub fn bind(&self, unit: &WorkUnit) -> Result<T> {
        self.bind_config(unit.name(), unit.config())
    }

    pub fn bind_config(&self, unit: &str, config: &TaskConfig) -> Result<T> {
        if let Some(key) = config
            .keys()
            .find(|k| !self.properties.iter().any(|p| p.name == k.as_str()))
        {
            return Err(Error::config(
                unit,
                format!("unknown option `{key}` for task kind `{}`", self.kind),
            ));
        }

        let mut out = T::default();
        for prop in self.properties {
            let value = match (config.get(prop.name), prop.default) {
                (Some(v), _) => v.clone(),
                (None, Some(default)) => serde_yaml::from_str(default).map_err(|err| {
                    Error::config(unit, format!("bad default for `{}`: {err}", prop.name))
                })?,
                (None, None) if prop.required => {
                    return Err(Error::config(
                        unit,
                        format!("missing required option `{}`", prop.name),
                    ));
                }
                (None, None) => continue,
            };

            (prop.set)(&mut out, &value)
                .map_err(|msg| Error::config(unit, format!("`{}`: {msg}", prop.name)))?;
        }

        Ok(out)
    }

    /// Current values of every property, as they would be written in a scenario file.
    pub fn describe(&self, value: &T) -> TaskConfig {
        self.properties
            .iter()
            .map(|p| (p.name.to_string(), (p.get)(value)))
            .collect()
    }

    pub fn docs(&self) -> Vec<PropertyDoc> {
        self.properties
            .iter()
            .map(|p| PropertyDoc {
                name: p.name,
                description: p.description,
                required: p.required,
                default: p.default,
            })
            .collect()
    }
}

/// A `humantime` string, or a bare number of seconds as in the scenario file.
pub fn duration_value(value: &Value) -> std::result::Result<Duration, String> {
    match value {
        Value::String(s) => humantime::parse_duration(s.trim()).map_err(|e| e.to_string()),
        Value::Number(n) => match (n.as_u64(), n.as_f64()) {
            (Some(secs), _) => Ok(Duration::from_secs(secs)),
            (None, Some(secs)) if secs.is_finite() && secs >= 0.0 => {
                Ok(Duration::from_secs_f64(secs))
            }
            _ => Err(format!("expected non-negative seconds, got {n}")),
        },
        other => Err(format!("expected a duration, got {other:?}")),
    }
}

pub fn duration_to_value(d: Duration) -> Value {
    Value::String(humantime::format_duration(d).to_string())
}

pub fn u64_value(value: &Value) -> std::result::Result<u64, String> {
    value
        .as_u64()
        .ok_or_else(|| format!("expected a non-negative integer, got {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::Weight;

    #[derive(Debug, Default, PartialEq)]
    struct Probe {
        wait: Duration,
        every: u64,
    }

    static PROBE: Schema<Probe> = Schema::new(
        "probe",
        &[
            Property {
                name: "wait",
                description: "time to wait",
                required: true,
                default: None,
                set: |p, v| {
                    p.wait = duration_value(v)?;
                    Ok(())
                },
                get: |p| duration_to_value(p.wait),
            },
            Property {
                name: "every",
                description: "period",
                required: false,
                default: Some("3"),
                set: |p, v| {
                    p.every = u64_value(v)?;
                    Ok(())
                },
                get: |p| Value::from(p.every),
            },
        ],
    );

    fn unit() -> WorkUnit {
        WorkUnit::new("u", "probe", Weight::Count(1))
    }

    #[test]
    fn binds_values_and_defaults() {
        let probe = PROBE
            .bind(&unit().with_option("wait", "150ms"))
            .unwrap_or_else(|e| panic!("bind: {e}"));
        assert_eq!(
            probe,
            Probe {
                wait: Duration::from_millis(150),
                every: 3
            }
        );

        let described = PROBE.describe(&probe);
        assert_eq!(described.get("wait"), Some(&Value::from("150ms")));
        assert_eq!(described.get("every"), Some(&Value::from(3u64)));
    }

    #[test]
    fn rejects_unknown_and_missing_keys() {
        let err = PROBE.bind(&unit().with_option("wait", "1s").with_option("nope", 1u64));
        assert!(matches!(err, Err(Error::InvalidConfig { message, .. }) if message.contains("nope")));

        let err = PROBE.bind(&unit());
        assert!(matches!(err, Err(Error::InvalidConfig { message, .. }) if message.contains("wait")));

        let err = PROBE.bind(&unit().with_option("wait", "soon"));
        assert!(matches!(err, Err(Error::InvalidConfig { unit, .. }) if unit == "u"));
    }

    #[test]
    fn bare_numbers_are_seconds() {
        assert_eq!(duration_value(&Value::from(5u64)), Ok(Duration::from_secs(5)));
        assert_eq!(duration_value(&Value::from(0.25)), Ok(Duration::from_millis(250)));
        assert!(duration_value(&Value::from("5")).is_err());
        assert!(duration_value(&Value::from(-1i64)).is_err());

        let probe = PROBE
            .bind(&unit().with_option("wait", 2u64))
            .unwrap_or_else(|e| panic!("bind: {e}"));
        assert_eq!(probe.wait, Duration::from_secs(2));
    }

    #[test]
    fn docs_list_every_property() {
        let docs = PROBE.docs();
        assert_eq!(docs.len(), 2);
        assert!(docs[0].required);
        assert_eq!(docs[1].default, Some("3"));
        assert_eq!(PROBE.kind(), "probe");
    }
}

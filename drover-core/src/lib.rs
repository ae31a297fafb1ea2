mod agent;
mod counters;
mod driver;
mod engine;
mod error;
mod phase;
mod proxy;
mod publish;
mod publishers;
mod registry;
mod run_mode;
mod schema;
mod splitter;
mod suite;
mod task;
pub mod tasks;

pub use agent::AgentId;
pub use counters::{CounterSnapshot, ExecutionCounters};
pub use driver::{AgentLink, ControlMessage, Driver, DriverHandle, LocalAgent, PhaseOutcome};
pub use engine::{DEFAULT_TICK, Engine, PhaseReport};
pub use error::{Error, Result};
pub use phase::{Phase, PhaseBound};
pub use proxy::{Benchmark, Proxy};
pub use publish::{PublishMode, PublishPipeline, Publisher};
pub use publishers::{JsonLinesPublisher, TracingPublisher};
pub use registry::{TaskFactory, TaskKind, TaskRegistry};
pub use run_mode::{Pacing, RunMode};
pub use schema::{Getter, Property, PropertyDoc, Schema, Setter, duration_to_value, duration_value, u64_value};
pub use splitter::{
    even_shares, split_phase, split_phase_for_rebalancing, split_phase_for_rebalancing_at,
};
pub use suite::{Suite, TaskConfig, Weight, WorkUnit};
pub use task::{AttemptContext, AttemptError, AttemptResult, Interrupt, Task};

pub use drover_metrics as metrics;

use crate::task::AttemptError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Metrics(#[from] drover_metrics::Error),

    /// An attempt did not pass. Re-raised by the measurement proxy after recording.
    #[error(transparent)]
    Attempt(#[from] AttemptError),

    #[error("agent list must not be empty")]
    NoAgents,

    #[error("agent `{0}` appears more than once")]
    DuplicateAgent(String),

    #[error("suite must contain at least one work unit")]
    EmptySuite,

    #[error("work unit `{0}` is declared more than once in the suite")]
    DuplicateWorkUnit(String),

    #[error("work unit `{0}` is unbounded but the phase has no duration")]
    UnboundedInCountPhase(String),

    #[error("unknown task kind `{0}`")]
    UnknownTaskKind(String),

    #[error("invalid config for `{unit}`: {message}")]
    InvalidConfig { unit: String, message: String },

    #[error("task registry is already installed")]
    RegistryInstalled,

    #[error("a phase is already running on agent `{0}`")]
    PhaseRunning(String),

    #[error("no phase is running")]
    PhaseNotRunning,

    #[error("agent is not paused")]
    NotPaused,

    #[error("rebalanced shard does not match the running suite")]
    ShardMismatch,

    #[error("publisher `{name}` failed: {message}")]
    Publisher { name: String, message: String },

    #[error("agent `{agent}` failed: {message}")]
    Agent { agent: String, message: String },

    #[error("driver control channel closed")]
    ChannelClosed,
}

impl Error {
    /// Configuration problems: retrying with the same input cannot succeed.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::NoAgents
                | Self::DuplicateAgent(_)
                | Self::EmptySuite
                | Self::DuplicateWorkUnit(_)
                | Self::UnboundedInCountPhase(_)
                | Self::UnknownTaskKind(_)
                | Self::InvalidConfig { .. }
                | Self::Metrics(_)
        )
    }

    pub(crate) fn config(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            unit: unit.into(),
            message: message.into(),
        }
    }
}

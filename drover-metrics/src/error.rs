pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("work unit `{0}` was recorded but never registered with the statistics store")]
    UnregisteredWorkUnit(String),

    #[error("invalid metric `{0}` (expected e.g. `passed`, `average`, `p99.9`, `throughput`)")]
    InvalidMetric(String),

    #[error("percentile must be within 0..=100 (got {0})")]
    InvalidPercentile(f64),
}

pub mod error;
pub mod metric;
pub mod result;
pub mod statistics;
pub mod store;

pub use error::{Error, Result};
pub use metric::{AggregatedResults, Metric, MetricKind, MetricResult, MetricSet, Unit};
pub use result::{Outcome, TestResult};
pub use statistics::TestStatistics;
pub use store::{RunMap, StatisticsMap};

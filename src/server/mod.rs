pub mod metrics;
pub mod runner;

pub use metrics::{Metrics, MetricsSnapshot};
pub use runner::run;

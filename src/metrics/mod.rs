//! Metrics - sampling, series storage and throughput estimation

pub mod sampler;
pub mod series;
pub mod throughput;

pub use sampler::{HttpMetricsSampler, MetricsSource, DEFAULT_METRICS_URL};
pub use series::{Counters, MetricsSample, RssReading, SampleSeries};

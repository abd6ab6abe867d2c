//! procbench - 监督 worker 进程、抓取生命周期标记、采样指标并计算吞吐量

pub mod cli;
pub mod config;
pub mod error;
pub mod infra;
pub mod lifecycle;
pub mod metrics;
pub mod supervise;

pub use config::{HarnessConfig, Predicate, RunConfig};
pub use error::{ConfigError, RunError, SampleError, SpawnError, ThroughputError};
pub use infra::{ProcessHandle, RunWorkspace, Termination, TextEncoding};
pub use lifecycle::{LifecycleClassifier, LifecycleEvent, LifecycleState, MarkerSet};
pub use metrics::{HttpMetricsSampler, MetricsSample, MetricsSource, RssReading, SampleSeries};
pub use supervise::{RunOutcome, RunPhase, RunReport, Supervisor};

//! 基础设施层 - 进程、输出、资源采样、临时工作目录

pub mod output;
pub mod process;
pub mod resource;
pub mod workspace;

pub use output::OutputDrainer;
pub use process::{pid_alive, ProcessHandle, Termination, DEFAULT_GRACE_PERIOD};
pub use resource::{platform_sampler, ProcessTableSampler, ResourceSampler, UnavailableSampler};
pub use workspace::{build_command, BestEffort, RunWorkspace, TextEncoding, MONITOR_SOURCE_BLOCK};

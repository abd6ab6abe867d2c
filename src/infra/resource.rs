//! Resource sampling - resident memory of the worker process

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::metrics::series::RssReading;

/// Reads resident set size for a pid
pub trait ResourceSampler: Send {
    fn sample_rss(&mut self, pid: u32) -> RssReading;
}

/// Reads RSS from the OS process table
pub struct ProcessTableSampler {
    system: System,
}

impl ProcessTableSampler {
    pub fn new() -> Self {
        Self { system: System::new() }
    }
}

impl Default for ProcessTableSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for ProcessTableSampler {
    fn sample_rss(&mut self, pid: u32) -> RssReading {
        let pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            ProcessRefreshKind::new().with_memory(),
        );
        match self.system.process(pid) {
            // memory() is in bytes
            Some(process) => RssReading::Kilobytes(process.memory() / 1024),
            None => RssReading::Unavailable,
        }
    }
}

/// For platforms without process table support
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableSampler;

impl ResourceSampler for UnavailableSampler {
    fn sample_rss(&mut self, _pid: u32) -> RssReading {
        RssReading::Unavailable
    }
}

/// Sampler for the current platform
pub fn platform_sampler() -> Box<dyn ResourceSampler> {
    if sysinfo::IS_SUPPORTED_SYSTEM {
        Box::new(ProcessTableSampler::new())
    } else {
        Box::new(UnavailableSampler)
    }
}

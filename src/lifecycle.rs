//! Lifecycle detection - scrapes worker output for start/ready markers

use regex::Regex;
use serde::Serialize;

/// Default product name used to build marker patterns
pub const DEFAULT_PRODUCT: &str = "fluentd";

/// Substring printed once the worker is ready to process data
pub const WORKER_READY_MARKER: &str = "worker is now running";

/// A milestone recognized in a single output line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleEvent {
    SupervisorStarted(u32),
    WorkerStarted(u32),
    WorkerRunning,
}

/// Maps one line of worker output to a lifecycle event.
///
/// Implementations must never fail: output is unstructured text and
/// anything unrecognized is simply `None`.
pub trait LifecycleClassifier: Send + Sync {
    fn classify(&self, line: &str) -> Option<LifecycleEvent>;
}

/// Regex based marker set
#[derive(Debug, Clone)]
pub struct MarkerSet {
    supervisor: Regex,
    worker: Regex,
    ready: String,
}

impl MarkerSet {
    /// Build a marker set from custom patterns.
    ///
    /// Both patterns must capture the pid in their first group.
    pub fn new(supervisor: &str, worker: &str, ready: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            supervisor: Regex::new(supervisor)?,
            worker: Regex::new(worker)?,
            ready: ready.into(),
        })
    }

    /// Markers printed by `<product>`: `starting <product>-<version> pid=<N>`,
    /// `starting <product> worker pid=<N> ` and `worker is now running`.
    pub fn for_product(product: &str) -> Result<Self, regex::Error> {
        let name = regex::escape(product);
        // the trailing space after the worker pid is part of the marker
        Self::new(
            &format!(r"starting {}-[.0-9]+ pid=(\d+)", name),
            &format!(r"starting {} worker pid=(\d+) ", name),
            WORKER_READY_MARKER,
        )
    }

    fn capture_pid(pattern: &Regex, line: &str) -> Option<u32> {
        pattern
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self::for_product(DEFAULT_PRODUCT).expect("built-in marker patterns are valid")
    }
}

impl LifecycleClassifier for MarkerSet {
    fn classify(&self, line: &str) -> Option<LifecycleEvent> {
        if let Some(pid) = Self::capture_pid(&self.supervisor, line) {
            return Some(LifecycleEvent::SupervisorStarted(pid));
        }
        if let Some(pid) = Self::capture_pid(&self.worker, line) {
            return Some(LifecycleEvent::WorkerStarted(pid));
        }
        if line.contains(&self.ready) {
            return Some(LifecycleEvent::WorkerRunning);
        }
        None
    }
}

/// Coarse view of where the worker is in its startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleStage {
    NotStarted,
    SupervisorDetected(u32),
    WorkerDetected(u32),
    WorkerRunning,
}

/// Accumulated lifecycle facts for one run.
///
/// Each field is set at most once; later matches never overwrite it and
/// `worker_running` never reverts to false.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleState {
    pub supervisor_pid: Option<u32>,
    pub worker_pid: Option<u32>,
    pub worker_running: bool,
}

impl LifecycleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event. Returns true if it changed the state.
    pub fn apply(&mut self, event: LifecycleEvent) -> bool {
        match event {
            LifecycleEvent::SupervisorStarted(pid) if self.supervisor_pid.is_none() => {
                self.supervisor_pid = Some(pid);
                true
            }
            LifecycleEvent::WorkerStarted(pid) if self.worker_pid.is_none() => {
                self.worker_pid = Some(pid);
                true
            }
            LifecycleEvent::WorkerRunning if !self.worker_running => {
                self.worker_running = true;
                true
            }
            _ => false,
        }
    }

    /// Classify a line and apply the result, returning the event only if it was new
    pub fn observe(&mut self, classifier: &dyn LifecycleClassifier, line: &str) -> Option<LifecycleEvent> {
        let event = classifier.classify(line)?;
        self.apply(event).then_some(event)
    }

    pub fn stage(&self) -> LifecycleStage {
        if self.worker_running {
            LifecycleStage::WorkerRunning
        } else if let Some(pid) = self.worker_pid {
            LifecycleStage::WorkerDetected(pid)
        } else if let Some(pid) = self.supervisor_pid {
            LifecycleStage::SupervisorDetected(pid)
        } else {
            LifecycleStage::NotStarted
        }
    }
}

//! Error types shared across the harness

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::supervise::{RunPhase, RunReport};

/// The worker process could not be started.
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("command line is empty")]
    EmptyCommand,

    #[error("failed to spawn {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("spawned process {program} reported no pid")]
    MissingPid { program: String },
}

/// A single metrics fetch failed.
#[derive(Error, Debug)]
pub enum SampleError {
    #[error("metrics request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("metrics endpoint returned HTTP {0}")]
    Status(u16),

    #[error("metrics body is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unexpected metrics document: {0}")]
    Shape(String),
}

/// Not enough non-edge samples to estimate a rate.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ThroughputError {
    #[error("insufficient data: {usable} usable samples, need at least {required}")]
    InsufficientData { usable: usize, required: usize },
}

/// Harness configuration could not be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid lifecycle marker pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("cannot build metrics sampler: {0}")]
    Sampler(#[from] SampleError),
}

/// A supervised run did not reach a successful outcome.
///
/// Every variant raised after the process was spawned carries the partial
/// report, so callers can tell whether the worker never started or started
/// but never satisfied the predicate.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("process exited during the {phase} phase")]
    ProcessDiedEarly {
        phase: RunPhase,
        report: Box<RunReport>,
    },

    #[error("run timed out after {elapsed:?} during the {phase} phase")]
    Timeout {
        phase: RunPhase,
        elapsed: Duration,
        report: Box<RunReport>,
    },

    #[error("metrics sampling failed during the running phase: {source}")]
    Sample {
        #[source]
        source: SampleError,
        report: Box<RunReport>,
    },
}

impl RunError {
    /// Partial report of the failed run, if the process was ever spawned.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunError::Spawn(_) => None,
            RunError::ProcessDiedEarly { report, .. }
            | RunError::Timeout { report, .. }
            | RunError::Sample { report, .. } => Some(report),
        }
    }

    /// Phase the run was in when it failed.
    pub fn phase(&self) -> Option<RunPhase> {
        self.report().map(|r| r.phase)
    }
}

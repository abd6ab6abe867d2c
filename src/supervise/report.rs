//! Run report - what a supervised run observed and how it ended

use serde::Serialize;
use std::fmt;

use crate::infra::process::Termination;
use crate::infra::workspace::BestEffort;
use crate::lifecycle::LifecycleState;
use crate::metrics::series::SampleSeries;

/// Output lines kept for diagnosis
pub const OUTPUT_TAIL_LINES: usize = 200;

/// Which half of the loop a run was in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Waiting for lifecycle markers, no sampling yet
    PreRunning,
    /// Worker confirmed running, sampling every tick
    Running,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::PreRunning => write!(f, "pre-running"),
            RunPhase::Running => write!(f, "running"),
        }
    }
}

/// States of the supervise loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    AwaitingSupervisor,
    AwaitingWorker,
    Running,
    Completed,
    TimedOut,
    Failed,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Completed | LoopState::TimedOut | LoopState::Failed)
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The predicate returned true
    Completed,
    /// No predicate was given and the process exited on its own after starting
    Exited,
    /// The overall timeout fired
    TimedOut,
    /// The process died early or sampling failed
    Failed,
}

/// Result of one termination attempt during cleanup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminationRecord {
    pub role: String,
    pub pid: u32,
    pub termination: Termination,
}

/// Everything cleanup did. Problems here are warnings only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub terminations: Vec<TerminationRecord>,
    /// The spawned process was seen to exit within the exit wait
    pub exit_confirmed: bool,
    pub workspace: Option<BestEffort>,
}

impl CleanupReport {
    pub fn has_warnings(&self) -> bool {
        !self.exit_confirmed
            || matches!(self.workspace, Some(BestEffort::Failed(_)))
            || self
                .terminations
                .iter()
                .any(|t| matches!(t.termination, Termination::Unconfirmed(_)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub phase: RunPhase,
    pub final_state: LoopState,
    pub lifecycle: LifecycleState,
    pub series: SampleSeries,
    pub elapsed_ms: u64,
    /// Last lines of combined worker output
    pub output_tail: Vec<String>,
    pub cleanup: CleanupReport,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed | RunOutcome::Exited | RunOutcome::TimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(RunPhase::PreRunning.to_string(), "pre-running");
        assert_eq!(RunPhase::Running.to_string(), "running");
    }

    #[test]
    fn test_cleanup_warnings() {
        let mut cleanup = CleanupReport {
            exit_confirmed: true,
            ..Default::default()
        };
        assert!(!cleanup.has_warnings());

        cleanup.workspace = Some(BestEffort::Failed("busy".to_string()));
        assert!(cleanup.has_warnings());

        cleanup.workspace = Some(BestEffort::Done);
        cleanup.terminations.push(TerminationRecord {
            role: "worker".to_string(),
            pid: 10,
            termination: Termination::Unconfirmed("still there".to_string()),
        });
        assert!(cleanup.has_warnings());
    }

    #[test]
    fn test_loop_state_terminal() {
        assert!(LoopState::TimedOut.is_terminal());
        assert!(!LoopState::AwaitingWorker.is_terminal());
    }
}

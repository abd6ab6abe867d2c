//! Process handle - spawn, liveness probe and escalating termination

use serde::Serialize;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, Signal, System};
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::output::OutputDrainer;
use crate::config::RunConfig;
use crate::error::SpawnError;

/// How long a process gets to honour the graceful stop signal
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const FORCE_KILL_CONFIRM: Duration = Duration::from_secs(5);

/// Result of a best-effort termination. Never an error: signal failures
/// (usually "process already gone") are folded into the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum Termination {
    /// Not running when termination started
    AlreadyExited,
    /// Exited within the grace period after the stop signal
    Graceful,
    /// Killed after the grace period
    Forced,
    /// Still observed after the forced kill
    Unconfirmed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    NotFound,
    Unsupported,
    Failed,
}

/// A supervised OS process.
///
/// Either a child spawned by this handle, or a pid learned from output
/// (supervisor/worker) that is only reachable through the process table.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    label: String,
    child: Option<Child>,
    exit_status: Option<ExitStatus>,
}

impl ProcessHandle {
    /// Spawn `config.command` with piped stdout/stderr
    pub fn spawn(config: &RunConfig) -> Result<Self, SpawnError> {
        let (program, args) = config.command.split_first().ok_or(SpawnError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = config.working_dir() {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        {
            if let Some(arg0) = &config.arg0 {
                cmd.arg0(arg0);
            }
        }

        let child = cmd.spawn().map_err(|source| SpawnError::Io {
            program: program.clone(),
            source,
        })?;
        let pid = child.id().ok_or_else(|| SpawnError::MissingPid {
            program: program.clone(),
        })?;

        info!(pid, program = %program, args = ?args, "Process spawned");
        Ok(Self {
            pid,
            label: program.clone(),
            child: Some(child),
            exit_status: None,
        })
    }

    /// Track a pid this harness did not spawn
    pub fn attach(pid: u32, label: impl Into<String>) -> Self {
        Self {
            pid,
            label: label.into(),
            child: None,
            exit_status: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Exit status, once a spawned child has been reaped
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Take the child's combined output streams. Only the first call on a
    /// spawned handle returns a drainer.
    pub fn take_output(&mut self) -> Option<OutputDrainer> {
        let child = self.child.as_mut()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        if stdout.is_none() && stderr.is_none() {
            return None;
        }
        Some(OutputDrainer::new(stdout, stderr))
    }

    /// Non-blocking liveness check
    pub fn is_alive(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return pid_alive(self.pid);
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                if self.exit_status.is_none() {
                    debug!(pid = self.pid, %status, "Process exited");
                }
                self.exit_status = Some(status);
                false
            }
            Err(e) => {
                warn!(pid = self.pid, error = %e, "Failed to poll process status");
                false
            }
        }
    }

    /// Stop gracefully, escalating to a forced kill after `grace`.
    ///
    /// Returns once the process is confirmed gone, or after a short bound
    /// following the forced kill (reported as `Unconfirmed`).
    pub async fn terminate(&mut self, grace: Duration) -> Termination {
        if !self.is_alive() {
            return Termination::AlreadyExited;
        }

        match send_signal(self.pid, Signal::Term) {
            Delivery::Sent => {
                debug!(pid = self.pid, label = %self.label, "Sent graceful stop");
                if self.wait_for_exit(grace).await {
                    info!(pid = self.pid, label = %self.label, "Process stopped");
                    return Termination::Graceful;
                }
                warn!(
                    pid = self.pid,
                    label = %self.label,
                    grace_ms = grace.as_millis() as u64,
                    "Process ignored graceful stop, killing"
                );
            }
            Delivery::Unsupported => {
                debug!(pid = self.pid, "Graceful stop unsupported on this platform, killing");
            }
            Delivery::NotFound | Delivery::Failed => {
                if !self.is_alive() {
                    return Termination::AlreadyExited;
                }
                warn!(pid = self.pid, label = %self.label, "Graceful stop could not be delivered, killing");
            }
        }

        self.force_kill().await
    }

    async fn force_kill(&mut self) -> Termination {
        match self.child.as_mut() {
            Some(child) => {
                if let Err(e) = child.start_kill() {
                    debug!(pid = self.pid, error = %e, "Kill failed, process likely gone");
                }
            }
            None => {
                let delivery = send_signal(self.pid, Signal::Kill);
                if delivery != Delivery::Sent {
                    debug!(pid = self.pid, ?delivery, "Kill not delivered");
                }
            }
        }

        if self.wait_for_exit(FORCE_KILL_CONFIRM).await {
            info!(pid = self.pid, label = %self.label, "Process killed");
            Termination::Forced
        } else {
            warn!(pid = self.pid, label = %self.label, "Process still present after kill");
            Termination::Unconfirmed(format!("pid {} still present after kill", self.pid))
        }
    }

    /// Wait up to `bound` for the process to exit. Returns true once it has.
    pub async fn wait_for_exit(&mut self, bound: Duration) -> bool {
        if let Some(child) = self.child.as_mut() {
            let waited = timeout(bound, child.wait()).await;
            return match waited {
                Ok(Ok(status)) => {
                    self.exit_status = Some(status);
                    true
                }
                Ok(Err(e)) => {
                    warn!(pid = self.pid, error = %e, "Failed to wait for process");
                    !self.is_alive()
                }
                Err(_) => false,
            };
        }

        let deadline = Instant::now() + bound;
        loop {
            if !pid_alive(self.pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(TERMINATE_POLL_INTERVAL).await;
        }
    }
}

/// Whether `pid` is present in the process table and not a zombie
pub fn pid_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    system
        .process(pid)
        .map(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .unwrap_or(false)
}

fn send_signal(pid: u32, signal: Signal) -> Delivery {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    match system.process(pid).map(|p| p.kill_with(signal)) {
        None => Delivery::NotFound,
        Some(None) => Delivery::Unsupported,
        Some(Some(true)) => Delivery::Sent,
        Some(Some(false)) => Delivery::Failed,
    }
}

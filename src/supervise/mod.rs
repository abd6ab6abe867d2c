//! Supervise loop - spawns the worker, watches its lifecycle, samples
//! metrics once it is running and always tears the process tree down.
//!
//! The loop runs on a single task. Each pre-running tick waits up to one
//! poll interval for output; each running tick is paced by an interval
//! timer and takes one metrics sample plus one RSS reading. The overall
//! timeout wraps the whole loop, so a hung metrics call is cancelled with
//! it, and cleanup runs after the loop no matter how it ended.

mod report;

pub use report::{
    CleanupReport, LoopState, RunOutcome, RunPhase, RunReport, TerminationRecord, OUTPUT_TAIL_LINES,
};

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{self, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{HarnessConfig, Predicate, RunConfig, MIN_POLL_INTERVAL};
use crate::error::{ConfigError, RunError, SampleError};
use crate::infra::output::OutputDrainer;
use crate::infra::process::ProcessHandle;
use crate::infra::resource::{platform_sampler, ResourceSampler};
use crate::infra::workspace::RunWorkspace;
use crate::lifecycle::{LifecycleClassifier, LifecycleStage, LifecycleState, MarkerSet};
use crate::metrics::sampler::{HttpMetricsSampler, MetricsSource};
use crate::metrics::series::{RssReading, SampleSeries};

const SAMPLE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// After a failed sample, how long to wait for the worker to finish
/// exiting. The endpoint is served by the worker and goes away slightly
/// before the process does.
const SAMPLE_EXIT_WINDOW: Duration = Duration::from_millis(500);

/// Why the loop body stopped
enum LoopExit {
    Completed,
    ProcessExited,
    TimedOut,
    SampleFailed(SampleError),
}

/// Per-run state. Kept outside the timed future so a timeout keeps
/// everything observed so far.
struct RunState {
    state: LoopState,
    lifecycle: LifecycleState,
    series: SampleSeries,
    tail: VecDeque<String>,
}

impl RunState {
    fn new() -> Self {
        Self {
            state: LoopState::AwaitingSupervisor,
            lifecycle: LifecycleState::new(),
            series: SampleSeries::new(),
            tail: VecDeque::with_capacity(OUTPUT_TAIL_LINES),
        }
    }

    fn phase(&self) -> RunPhase {
        if self.lifecycle.worker_running {
            RunPhase::Running
        } else {
            RunPhase::PreRunning
        }
    }

    fn record_output(&mut self, line: String) {
        debug!(target: "procbench::worker", "{}", line);
        if self.tail.len() == OUTPUT_TAIL_LINES {
            self.tail.pop_front();
        }
        self.tail.push_back(line);
    }

    fn refresh_state(&mut self) {
        self.state = match self.lifecycle.stage() {
            LifecycleStage::NotStarted => LoopState::AwaitingSupervisor,
            LifecycleStage::SupervisorDetected(_) | LifecycleStage::WorkerDetected(_) => LoopState::AwaitingWorker,
            LifecycleStage::WorkerRunning => LoopState::Running,
        };
    }

    fn into_report(self, outcome: RunOutcome, phase: RunPhase, elapsed: Duration, cleanup: CleanupReport) -> RunReport {
        RunReport {
            outcome,
            phase,
            final_state: self.state,
            lifecycle: self.lifecycle,
            series: self.series,
            elapsed_ms: elapsed.as_millis() as u64,
            output_tail: self.tail.into_iter().collect(),
            cleanup,
        }
    }
}

/// Drives one supervised run at a time
pub struct Supervisor {
    classifier: Box<dyn LifecycleClassifier>,
    metrics: Box<dyn MetricsSource>,
    resources: Box<dyn ResourceSampler>,
}

impl Supervisor {
    /// Default markers and the platform RSS sampler
    pub fn new(metrics: Box<dyn MetricsSource>) -> Self {
        Self {
            classifier: Box::new(MarkerSet::default()),
            metrics,
            resources: platform_sampler(),
        }
    }

    /// HTTP sampler and product markers from the harness config
    pub fn from_config(config: &HarnessConfig) -> Result<Self, ConfigError> {
        let sampler = HttpMetricsSampler::new(config.metrics_url.clone(), config.sample_timeout())?;
        let markers = MarkerSet::for_product(&config.product)?;
        Ok(Self::new(Box::new(sampler)).with_classifier(markers))
    }

    pub fn with_classifier(mut self, classifier: impl LifecycleClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn with_resource_sampler(mut self, resources: Box<dyn ResourceSampler>) -> Self {
        self.resources = resources;
        self
    }

    /// Run `config.command` to completion, timeout or failure.
    ///
    /// A timeout is only an error when a predicate was supplied and
    /// `ignore_timeout` is off; without a predicate it is the normal end of
    /// a fixed-duration run.
    pub async fn run(&mut self, mut config: RunConfig) -> Result<RunReport, RunError> {
        let started = Instant::now();

        let mut handle = match ProcessHandle::spawn(&config) {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "Spawn failed");
                if let Some(workspace) = config.workspace.take() {
                    workspace.remove();
                }
                return Err(e.into());
            }
        };
        let workspace = config.workspace.take();
        let mut predicate = config.predicate.take();
        let has_predicate = predicate.is_some();
        let mut output = handle.take_output();
        let mut run = RunState::new();

        let body = self.drive(&mut handle, output.as_mut(), &mut run, predicate.as_mut(), &config);
        let exit = match timeout(config.run_timeout, body).await {
            Ok(exit) => exit,
            Err(_) => LoopExit::TimedOut,
        };

        if let Some(output) = output.as_mut() {
            for line in output.take_lines() {
                run.record_output(line);
            }
            if let Some(partial) = output.take_partial() {
                run.record_output(partial);
            }
        }

        let phase = run.phase();
        let cleanup = cleanup(&mut handle, &run.lifecycle, workspace, &config).await;
        let elapsed = started.elapsed();

        match exit {
            LoopExit::Completed => {
                run.state = LoopState::Completed;
                info!(samples = run.series.len(), elapsed_ms = elapsed.as_millis() as u64, "Run completed");
                Ok(run.into_report(RunOutcome::Completed, phase, elapsed, cleanup))
            }
            LoopExit::ProcessExited if phase == RunPhase::Running && !has_predicate => {
                run.state = LoopState::Completed;
                info!(samples = run.series.len(), "Process exited after running");
                Ok(run.into_report(RunOutcome::Exited, phase, elapsed, cleanup))
            }
            LoopExit::ProcessExited => {
                run.state = LoopState::Failed;
                error!(%phase, "Process exited early");
                let report = Box::new(run.into_report(RunOutcome::Failed, phase, elapsed, cleanup));
                Err(RunError::ProcessDiedEarly { phase, report })
            }
            LoopExit::TimedOut => {
                run.state = LoopState::TimedOut;
                let report = run.into_report(RunOutcome::TimedOut, phase, elapsed, cleanup);
                if has_predicate && !config.ignore_timeout {
                    warn!(%phase, elapsed_ms = report.elapsed_ms, "Run timed out before the predicate held");
                    Err(RunError::Timeout {
                        phase,
                        elapsed,
                        report: Box::new(report),
                    })
                } else {
                    info!(%phase, samples = report.series.len(), "Run timeout reached");
                    Ok(report)
                }
            }
            LoopExit::SampleFailed(source) => {
                run.state = LoopState::Failed;
                let report = Box::new(run.into_report(RunOutcome::Failed, phase, elapsed, cleanup));
                Err(RunError::Sample { source, report })
            }
        }
    }

    async fn drive(
        &mut self,
        handle: &mut ProcessHandle,
        mut output: Option<&mut OutputDrainer>,
        run: &mut RunState,
        mut predicate: Option<&mut Predicate>,
        config: &RunConfig,
    ) -> LoopExit {
        let mut ticker: Option<time::Interval> = None;

        loop {
            if !handle.is_alive() {
                self.collect_final_output(output.as_deref_mut(), run, config).await;
                return LoopExit::ProcessExited;
            }

            let Some(interval) = ticker.as_mut() else {
                self.pump_output(output.as_deref_mut(), config.poll_interval, run, true).await;
                if run.lifecycle.worker_running {
                    info!(
                        supervisor_pid = ?run.lifecycle.supervisor_pid,
                        worker_pid = ?run.lifecycle.worker_pid,
                        "Worker running, sampling metrics"
                    );
                    let mut interval = time::interval(config.poll_interval.max(MIN_POLL_INTERVAL));
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker = Some(interval);
                }
                continue;
            };

            interval.tick().await;
            self.pump_output(output.as_deref_mut(), Duration::ZERO, run, false).await;

            let sample = match self.sample_with_retry(config.sample_retries).await {
                Ok(sample) => sample,
                Err(e) => {
                    if handle.wait_for_exit(SAMPLE_EXIT_WINDOW).await {
                        info!(error = %e, "Metrics endpoint gone with the process");
                        self.collect_final_output(output.as_deref_mut(), run, config).await;
                        return LoopExit::ProcessExited;
                    }
                    return LoopExit::SampleFailed(e);
                }
            };
            let rss = match run.lifecycle.worker_pid {
                Some(pid) => self.resources.sample_rss(pid),
                None => RssReading::Unavailable,
            };
            run.series.push(sample, rss);
            debug!(samples = run.series.len(), rss_kb = ?rss.kilobytes(), "Sample recorded");

            if let Some(predicate) = predicate.as_deref_mut() {
                if predicate(&run.series) {
                    return LoopExit::Completed;
                }
            }
        }
    }

    /// Pick up whatever the exited process wrote last
    async fn collect_final_output(&self, mut output: Option<&mut OutputDrainer>, run: &mut RunState, config: &RunConfig) {
        if let Some(output) = output.as_deref_mut() {
            output.drain_to_end(config.poll_interval).await;
        }
        let classify = !run.lifecycle.worker_running;
        self.pump_output(output, Duration::ZERO, run, classify).await;
    }

    /// Drain output and, before the worker runs, classify new lines
    async fn pump_output(&self, output: Option<&mut OutputDrainer>, wait: Duration, run: &mut RunState, classify: bool) {
        let Some(output) = output else {
            if !wait.is_zero() {
                sleep(wait).await;
            }
            return;
        };

        output.drain(wait).await;
        for line in output.take_lines() {
            if classify {
                if let Some(event) = run.lifecycle.observe(self.classifier.as_ref(), &line) {
                    info!(?event, "Lifecycle event");
                }
            }
            run.record_output(line);
        }
        if classify {
            run.refresh_state();
        }
    }

    async fn sample_with_retry(&mut self, retries: u32) -> Result<crate::metrics::MetricsSample, SampleError> {
        let mut attempt = 0;
        loop {
            match self.metrics.sample().await {
                Ok(sample) => return Ok(sample),
                Err(e) if attempt < retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "Metrics sample failed, retrying");
                    sleep(SAMPLE_RETRY_DELAY).await;
                }
                Err(e) => {
                    error!(error = %e, "Metrics sample failed");
                    return Err(e);
                }
            }
        }
    }
}

/// Terminate the spawned process and any tracked supervisor/worker pids,
/// confirm the exit, then remove the workspace. Runs exactly once per run.
async fn cleanup(
    handle: &mut ProcessHandle,
    lifecycle: &LifecycleState,
    workspace: Option<RunWorkspace>,
    config: &RunConfig,
) -> CleanupReport {
    let mut report = CleanupReport::default();

    let termination = handle.terminate(config.grace_period).await;
    report.terminations.push(TerminationRecord {
        role: "process".to_string(),
        pid: handle.pid(),
        termination,
    });

    for (role, pid) in [("supervisor", lifecycle.supervisor_pid), ("worker", lifecycle.worker_pid)] {
        let Some(pid) = pid else {
            continue;
        };
        if report.terminations.iter().any(|t| t.pid == pid) {
            continue;
        }
        let mut tracked = ProcessHandle::attach(pid, role);
        let termination = tracked.terminate(config.grace_period).await;
        report.terminations.push(TerminationRecord {
            role: role.to_string(),
            pid,
            termination,
        });
    }

    report.exit_confirmed = handle.wait_for_exit(config.exit_wait).await;
    if !report.exit_confirmed {
        warn!(pid = handle.pid(), "Process exit not confirmed");
    }

    report.workspace = workspace.map(RunWorkspace::remove);
    report
}

//! Output formatting for CLI commands

use serde::Serialize;
use std::fmt::Write;

use crate::metrics::throughput;
use crate::supervise::RunReport;

use super::run::CounterTarget;

/// Format output as pretty JSON, or with `compact` on a single line
pub fn format_output<T: Serialize>(data: &T, compact: bool) -> String {
    let rendered = if compact {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    rendered.unwrap_or_else(|_| "{}".to_string())
}

/// Throughput of one counter over a finished run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThroughputSummary {
    pub plugin_id: String,
    pub counter: String,
    pub per_tick: Option<f64>,
    pub per_second: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ThroughputSummary {
    pub fn compute(report: &RunReport, target: &CounterTarget, poll_interval: std::time::Duration) -> Self {
        match throughput::compute(&report.series, &target.plugin_id, &target.counter) {
            Ok(rate) => Self {
                plugin_id: target.plugin_id.clone(),
                counter: target.counter.clone(),
                per_tick: Some(rate),
                per_second: Some(throughput::per_second(rate, poll_interval)),
                error: None,
            },
            Err(e) => Self {
                plugin_id: target.plugin_id.clone(),
                counter: target.counter.clone(),
                per_tick: None,
                per_second: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// JSON document printed by `--json`
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub report: &'a RunReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput: Option<ThroughputSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Human readable run summary
pub fn render_report(report: &RunReport, throughput: Option<&ThroughputSummary>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "outcome: {:?} ({} phase)", report.outcome, report.phase);
    let _ = writeln!(out, "  elapsed: {:.1}s", report.elapsed_ms as f64 / 1000.0);
    if let Some(pid) = report.lifecycle.supervisor_pid {
        let _ = writeln!(out, "  supervisor pid: {}", pid);
    }
    if let Some(pid) = report.lifecycle.worker_pid {
        let _ = writeln!(out, "  worker pid: {}", pid);
    }
    let _ = writeln!(out, "  samples: {}", report.series.len());
    match report.series.peak_rss() {
        Some(kb) => {
            let _ = writeln!(out, "  peak rss: {} KiB", kb);
        }
        None if !report.series.is_empty() => {
            let _ = writeln!(out, "  peak rss: unavailable");
        }
        None => {}
    }

    if let Some(tp) = throughput {
        match (tp.per_tick, tp.per_second) {
            (Some(per_tick), Some(per_second)) => {
                let _ = writeln!(
                    out,
                    "  throughput {}:{}: {:.2}/tick, {:.2}/s",
                    tp.plugin_id, tp.counter, per_tick, per_second
                );
            }
            _ => {
                let _ = writeln!(
                    out,
                    "  throughput {}:{}: {}",
                    tp.plugin_id,
                    tp.counter,
                    tp.error.as_deref().unwrap_or("unavailable")
                );
            }
        }
    }

    if report.cleanup.has_warnings() {
        let _ = writeln!(out, "  cleanup warnings:");
        for t in &report.cleanup.terminations {
            let _ = writeln!(out, "    {} {}: {:?}", t.role, t.pid, t.termination);
        }
        if !report.cleanup.exit_confirmed {
            let _ = writeln!(out, "    exit not confirmed");
        }
        if let Some(crate::infra::BestEffort::Failed(reason)) = &report.cleanup.workspace {
            let _ = writeln!(out, "    workspace not removed: {}", reason);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleState;
    use crate::metrics::{MetricsSample, RssReading, SampleSeries};
    use crate::supervise::{CleanupReport, LoopState, RunOutcome, RunPhase};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn report_with(values: &[f64]) -> RunReport {
        let mut series = SampleSeries::new();
        for v in values {
            let mut counters = BTreeMap::new();
            counters.insert("emit_records".to_string(), *v);
            let mut plugins = BTreeMap::new();
            plugins.insert("object:in".to_string(), counters);
            series.push(MetricsSample::new(plugins), RssReading::Kilobytes(2048));
        }
        RunReport {
            outcome: RunOutcome::TimedOut,
            phase: RunPhase::Running,
            final_state: LoopState::TimedOut,
            lifecycle: LifecycleState {
                supervisor_pid: Some(10),
                worker_pid: Some(11),
                worker_running: true,
            },
            series,
            elapsed_ms: 6500,
            output_tail: Vec::new(),
            cleanup: CleanupReport {
                exit_confirmed: true,
                ..Default::default()
            },
        }
    }

    fn target() -> CounterTarget {
        "object:in:emit_records".parse().unwrap()
    }

    #[test]
    fn test_throughput_summary() {
        let report = report_with(&[0.0, 100.0, 300.0, 500.0, 700.0, 800.0]);
        let tp = ThroughputSummary::compute(&report, &target(), Duration::from_millis(500));
        assert_eq!(tp.per_tick, Some(200.0));
        assert_eq!(tp.per_second, Some(400.0));
        assert!(tp.error.is_none());
    }

    #[test]
    fn test_throughput_summary_insufficient() {
        let report = report_with(&[0.0, 100.0, 200.0]);
        let tp = ThroughputSummary::compute(&report, &target(), Duration::from_secs(1));
        assert!(tp.per_tick.is_none());
        assert!(tp.error.unwrap().contains("insufficient data"));
    }

    #[test]
    fn test_render_report() {
        let report = report_with(&[0.0, 100.0, 300.0, 500.0, 700.0, 800.0]);
        let tp = ThroughputSummary::compute(&report, &target(), Duration::from_secs(1));
        let text = render_report(&report, Some(&tp));
        assert!(text.contains("outcome: TimedOut (running phase)"));
        assert!(text.contains("worker pid: 11"));
        assert!(text.contains("samples: 6"));
        assert!(text.contains("peak rss: 2048 KiB"));
        assert!(text.contains("200.00/tick"));
        assert!(!text.contains("cleanup warnings"));
    }

    #[test]
    fn test_format_output_compact() {
        let summary = vec!["a", "b"];
        assert_eq!(format_output(&summary, true), r#"["a","b"]"#);
        assert!(format_output(&summary, false).contains('\n'));
    }
}

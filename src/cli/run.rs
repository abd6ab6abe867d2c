//! Run 命令 - 监督任意命令，采样指标直到谓词成立或超时
//!
//! Shared options live here too; `bench` flattens the same set.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

use crate::config::{HarnessConfig, RunConfig};
use crate::metrics::SampleSeries;
use crate::supervise::Supervisor;

use super::output::{format_output, render_report, RunSummary, ThroughputSummary};

/// `plugin_id:counter`. The split is on the last `:` since plugin ids may
/// contain colons themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterTarget {
    pub plugin_id: String,
    pub counter: String,
}

impl FromStr for CounterTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((plugin_id, counter)) if !plugin_id.is_empty() && !counter.is_empty() => Ok(Self {
                plugin_id: plugin_id.to_string(),
                counter: counter.to_string(),
            }),
            _ => Err(format!("expected plugin_id:counter, got '{}'", s)),
        }
    }
}

/// `plugin_id:counter>=value`, checked against the latest sample
#[derive(Debug, Clone, PartialEq)]
pub struct CounterCondition {
    pub target: CounterTarget,
    pub threshold: f64,
}

impl CounterCondition {
    pub fn is_met(&self, series: &SampleSeries) -> bool {
        series.last_counter(&self.target.plugin_id, &self.target.counter) >= self.threshold
    }
}

impl FromStr for CounterCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (target, threshold) = s
            .split_once(">=")
            .ok_or_else(|| format!("expected plugin_id:counter>=value, got '{}'", s))?;
        let threshold = threshold
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid threshold '{}': {}", threshold.trim(), e))?;
        Ok(Self {
            target: target.trim().parse()?,
            threshold,
        })
    }
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

/// 所有运行类命令共享的参数
#[derive(Args, Debug, Clone, Default)]
pub struct SharedOpts {
    /// 配置文件路径 (默认: <config_dir>/procbench/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// 整体超时（秒）
    #[arg(long)]
    pub timeout: Option<u64>,

    /// 采样间隔（毫秒）
    #[arg(long)]
    pub interval: Option<u64>,

    /// 额外环境变量 KEY=VALUE，可重复
    #[arg(long = "env", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Stop once this many samples have been collected
    #[arg(long, conflicts_with = "until")]
    pub samples: Option<usize>,

    /// Stop once the latest sample satisfies plugin_id:counter>=value
    #[arg(long)]
    pub until: Option<CounterCondition>,

    /// Report throughput of plugin_id:counter when the run ends
    #[arg(long)]
    pub throughput: Option<CounterTarget>,

    /// 超时视为正常结束
    #[arg(long)]
    pub ignore_timeout: bool,

    /// 输出 JSON 格式
    #[arg(long)]
    pub json: bool,
}

impl SharedOpts {
    /// Load the harness config and apply command line overrides
    pub fn harness(&self) -> Result<HarnessConfig> {
        let mut harness = HarnessConfig::load(self.config.as_deref())?;
        if let Some(secs) = self.timeout {
            harness.run_timeout_secs = secs;
        }
        if let Some(ms) = self.interval {
            if ms == 0 {
                return Err(anyhow!("--interval must be greater than zero"));
            }
            harness.poll_interval_ms = ms;
        }
        if self.ignore_timeout {
            harness.ignore_timeout = true;
        }
        Ok(harness)
    }

    pub fn run_config(&self, harness: &HarnessConfig, command: Vec<String>) -> RunConfig {
        let mut run = RunConfig::from_harness(harness, command);
        for (key, value) in &self.env {
            run = run.with_env(key, value);
        }
        if let Some(count) = self.samples {
            run = run.with_predicate(move |series| series.len() >= count);
        }
        if let Some(condition) = self.until.clone() {
            run = run.with_predicate(move |series| condition.is_met(series));
        }
        run
    }
}

/// Run 命令参数
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub opts: SharedOpts,

    /// 要监督的命令及其参数
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// 处理 run 命令
pub async fn handle_run(args: RunArgs) -> Result<()> {
    let harness = args.opts.harness()?;
    let run = args.opts.run_config(&harness, args.command);
    execute(&args.opts, &harness, run).await
}

/// Supervise one run and print its report. Failed runs still print the
/// partial report before the error is returned.
pub async fn execute(opts: &SharedOpts, harness: &HarnessConfig, run: RunConfig) -> Result<()> {
    let mut supervisor = Supervisor::from_config(harness).context("failed to set up supervisor")?;
    info!(command = ?run.command, timeout_secs = harness.run_timeout_secs, "Starting run");

    let result = supervisor.run(run).await;
    let (report, error) = match &result {
        Ok(report) => (Some(report), None),
        Err(e) => (e.report(), Some(e.to_string())),
    };

    if let Some(report) = report {
        let throughput = opts
            .throughput
            .as_ref()
            .map(|target| ThroughputSummary::compute(report, target, harness.poll_interval()));
        if let Some(tp) = throughput.as_ref().filter(|tp| tp.error.is_some()) {
            warn!(plugin_id = %tp.plugin_id, counter = %tp.counter, "Throughput unavailable");
        }

        if opts.json {
            let summary = RunSummary {
                report,
                throughput,
                error,
            };
            println!("{}", format_output(&summary, false));
        } else {
            print!("{}", render_report(report, throughput.as_ref()));
        }
    }

    result.map(|_| ()).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricsSample, RssReading};
    use std::collections::BTreeMap;

    fn sample(plugin: &str, counter: &str, value: f64) -> MetricsSample {
        let mut counters = BTreeMap::new();
        counters.insert(counter.to_string(), value);
        let mut plugins = BTreeMap::new();
        plugins.insert(plugin.to_string(), counters);
        MetricsSample::new(plugins)
    }

    #[test]
    fn test_counter_target_parsing() {
        let target: CounterTarget = "object:3fe1:emit_records".parse().unwrap();
        assert_eq!(target.plugin_id, "object:3fe1");
        assert_eq!(target.counter, "emit_records");

        assert!("emit_records".parse::<CounterTarget>().is_err());
        assert!("in:".parse::<CounterTarget>().is_err());
    }

    #[test]
    fn test_counter_condition() {
        let condition: CounterCondition = "out_file:write_count >= 3".parse().unwrap();
        assert_eq!(condition.target.plugin_id, "out_file");
        assert_eq!(condition.threshold, 3.0);

        let mut series = SampleSeries::new();
        assert!(!condition.is_met(&series));
        series.push(sample("out_file", "write_count", 2.0), RssReading::Unavailable);
        assert!(!condition.is_met(&series));
        series.push(sample("out_file", "write_count", 3.0), RssReading::Unavailable);
        assert!(condition.is_met(&series));

        assert!("out_file:write_count>3".parse::<CounterCondition>().is_err());
        assert!("out_file:write_count>=many".parse::<CounterCondition>().is_err());
    }

    #[test]
    fn test_env_pair() {
        assert_eq!(
            parse_env_pair("BUNDLE_GEMFILE=/src/Gemfile").unwrap(),
            ("BUNDLE_GEMFILE".to_string(), "/src/Gemfile".to_string())
        );
        assert_eq!(parse_env_pair("EMPTY=").unwrap().1, "");
        assert!(parse_env_pair("=x").is_err());
        assert!(parse_env_pair("NOVALUE").is_err());
    }

    #[test]
    fn test_run_config_from_opts() {
        let opts = SharedOpts {
            timeout: Some(5),
            interval: Some(250),
            env: vec![("A".to_string(), "1".to_string())],
            samples: Some(3),
            ..Default::default()
        };
        let mut harness = HarnessConfig::default();
        harness.run_timeout_secs = opts.timeout.unwrap();
        harness.poll_interval_ms = opts.interval.unwrap();

        let run = opts.run_config(&harness, vec!["true".to_string()]);
        assert_eq!(run.run_timeout, std::time::Duration::from_secs(5));
        assert_eq!(run.poll_interval, std::time::Duration::from_millis(250));
        assert_eq!(run.env.get("A").map(String::as_str), Some("1"));
        assert!(run.has_predicate());
    }
}

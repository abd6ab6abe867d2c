//! Probe 命令 - 取一次指标样本并打印

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use crate::config::HarnessConfig;
use crate::metrics::{HttpMetricsSampler, MetricsSource};

use super::output::format_output;

/// Probe 命令参数
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// 指标地址 (默认取配置或 PROCBENCH_METRICS_URL)
    #[arg(long)]
    pub url: Option<String>,

    /// 配置文件路径
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// 单行 JSON 输出
    #[arg(long)]
    pub compact: bool,
}

/// 处理 probe 命令
pub async fn handle_probe(args: ProbeArgs) -> Result<()> {
    let harness = HarnessConfig::load(args.config.as_deref())?;
    let url = args.url.unwrap_or(harness.metrics_url.clone());

    let mut sampler = HttpMetricsSampler::new(url.clone(), harness.sample_timeout())?;
    let sample = sampler
        .sample()
        .await
        .with_context(|| format!("failed to sample {}", url))?;

    println!("{}", format_output(&sample, args.compact));
    Ok(())
}

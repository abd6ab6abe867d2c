//! procbench CLI
//!
//! 监督 worker 进程并采样其指标端点

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use procbench::cli::{handle_bench, handle_probe, handle_run, BenchArgs, ProbeArgs, RunArgs};

#[derive(Parser)]
#[command(name = "procbench")]
#[command(about = "procbench - 监督 worker 进程并采样指标")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 监督任意命令: procbench run [opts] -- <command...>
    Run(RunArgs),
    /// 在临时工作目录中用生成的配置启动 worker
    Bench(BenchArgs),
    /// 取一次指标样本并以 JSON 打印
    Probe(ProbeArgs),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // worker 输出在 debug 级别，target 为 procbench::worker
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("procbench=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => handle_run(args).await,
        Commands::Bench(args) => handle_bench(args).await,
        Commands::Probe(args) => handle_probe(args).await,
    }
}

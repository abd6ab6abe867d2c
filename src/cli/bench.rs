//! Bench 命令 - 在临时工作目录中启动 fluentd 风格的 worker 并采样
//!
//! 生成的配置文件总是以 monitor_agent source 开头，插件文件复制到 `plugin/`。

use anyhow::{anyhow, Context, Result};
use clap::Args;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::infra::workspace::{build_command, RunWorkspace, TextEncoding};

use super::run::{execute, SharedOpts};

/// Name of the generated config inside the workspace
pub const BENCH_CONF_NAME: &str = "bench.conf";

/// Environment variable pinning the dependency-resolution file
pub const GEMFILE_ENV: &str = "BUNDLE_GEMFILE";

/// Bench 命令参数
#[derive(Args, Debug)]
pub struct BenchArgs {
    /// worker 可执行文件（路径或 PATH 中的名字）
    #[arg(long)]
    pub executable: String,

    /// 追加到 monitor_agent source 之后的配置内容
    #[arg(long)]
    pub conf: PathBuf,

    /// 生成配置文件的编码: utf-8, utf-16le, utf-16be
    #[arg(long, default_value = "utf-8")]
    pub encoding: TextEncoding,

    /// 复制到 plugin/ 的插件文件，可重复
    #[arg(long = "plugin")]
    pub plugins: Vec<PathBuf>,

    /// Gemfile passed to the worker as BUNDLE_GEMFILE (default: searched
    /// beside the executable, then its parent, then the current directory)
    #[arg(long)]
    pub gemfile: Option<PathBuf>,

    /// Process name the worker sees as argv[0] (Unix only)
    #[arg(long)]
    pub arg0: Option<String>,

    #[command(flatten)]
    pub opts: SharedOpts,

    /// 传给 worker 的额外参数
    #[arg(last = true)]
    pub extra: Vec<String>,
}

/// Gemfile for the worker: the explicit path if given (it must exist),
/// otherwise the first `Gemfile` found beside the executable, one level
/// above it, or in `cwd`.
pub fn resolve_gemfile(explicit: Option<&Path>, executable: &Path, cwd: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        let path = fs::canonicalize(path).with_context(|| format!("Gemfile not found: {}", path.display()))?;
        return Ok(Some(path));
    }

    let exe_dir = executable.parent();
    let candidates = [exe_dir, exe_dir.and_then(Path::parent), cwd];
    let found = candidates
        .into_iter()
        .flatten()
        .map(|dir| dir.join("Gemfile"))
        .find(|path| path.is_file())
        .and_then(|path| fs::canonicalize(path).ok());
    Ok(found)
}

/// Populate a fresh workspace and return it with the command to run inside it
pub fn prepare_workspace(args: &BenchArgs, executable: &Path) -> Result<(RunWorkspace, Vec<String>)> {
    let content = fs::read_to_string(&args.conf)
        .with_context(|| format!("failed to read config {}", args.conf.display()))?;

    let workspace = RunWorkspace::create().context("failed to create workspace")?;
    let conf_path = workspace
        .create_conf_file(BENCH_CONF_NAME, &content, args.encoding)
        .context("failed to write generated config")?;

    for plugin in &args.plugins {
        let name = plugin
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("invalid plugin path: {}", plugin.display()))?;
        let source = fs::read_to_string(plugin)
            .with_context(|| format!("failed to read plugin {}", plugin.display()))?;
        let copied = workspace.create_plugin_file(name, &source)?;
        debug!(plugin = %copied.display(), "Plugin copied");
    }

    let command = build_command(&executable.to_string_lossy(), &conf_path, &args.extra);
    Ok((workspace, command))
}

/// 处理 bench 命令
pub async fn handle_bench(args: BenchArgs) -> Result<()> {
    let executable = which::which(&args.executable)
        .map_err(|_| anyhow!("executable not found: {}", args.executable))?;
    let harness = args.opts.harness()?;

    let (workspace, command) = prepare_workspace(&args, &executable)?;
    let mut run = args.opts.run_config(&harness, command);
    if run.env.contains_key(GEMFILE_ENV) {
        debug!("BUNDLE_GEMFILE set with --env");
    } else {
        let cwd = std::env::current_dir().ok();
        match resolve_gemfile(args.gemfile.as_deref(), &executable, cwd.as_deref())? {
            Some(gemfile) => {
                debug!(gemfile = %gemfile.display(), "Pinning worker Gemfile");
                run = run.with_env(GEMFILE_ENV, gemfile.to_string_lossy());
            }
            None if std::env::var_os(GEMFILE_ENV).is_some() => {
                debug!("Worker inherits BUNDLE_GEMFILE from the environment");
            }
            None => warn!(executable = %executable.display(), "No Gemfile found, BUNDLE_GEMFILE not set"),
        }
    }
    if let Some(arg0) = &args.arg0 {
        run = run.with_arg0(arg0);
    }
    let run = run.with_workspace(workspace);

    execute(&args.opts, &harness, run).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::workspace::{MONITOR_SOURCE_BLOCK, PLUGIN_DIR};

    fn args_for(conf: PathBuf, plugins: Vec<PathBuf>) -> BenchArgs {
        BenchArgs {
            executable: "fluentd".to_string(),
            conf,
            encoding: TextEncoding::Utf8,
            plugins,
            gemfile: None,
            arg0: None,
            opts: SharedOpts::default(),
            extra: vec!["--no-supervisor".to_string()],
        }
    }

    #[test]
    fn test_prepare_workspace() {
        let input = tempfile::tempdir().unwrap();
        let conf = input.path().join("in.conf");
        fs::write(&conf, "<match **>\n  @type null\n</match>\n").unwrap();
        let plugin = input.path().join("out_slow.rb");
        fs::write(&plugin, "# plugin").unwrap();

        let args = args_for(conf, vec![plugin]);
        let (workspace, command) = prepare_workspace(&args, Path::new("/usr/bin/fluentd")).unwrap();

        let generated = workspace.path().join(BENCH_CONF_NAME);
        let text = fs::read_to_string(&generated).unwrap();
        assert!(text.starts_with(MONITOR_SOURCE_BLOCK));
        assert!(text.ends_with("</match>\n"));
        assert!(workspace.path().join(PLUGIN_DIR).join("out_slow.rb").exists());

        assert_eq!(command[0], "/usr/bin/fluentd");
        assert_eq!(command[1], "-c");
        assert_eq!(Path::new(&command[2]), generated.as_path());
        assert_eq!(command[3], "--no-supervisor");
    }

    #[test]
    fn test_resolve_gemfile() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let executable = bin.join("fluentd");
        let cwd = tempfile::tempdir().unwrap();

        // nothing to find
        assert!(resolve_gemfile(None, &executable, Some(cwd.path())).unwrap().is_none());

        // cwd is the last resort
        fs::write(cwd.path().join("Gemfile"), "").unwrap();
        let found = resolve_gemfile(None, &executable, Some(cwd.path())).unwrap().unwrap();
        assert_eq!(found, fs::canonicalize(cwd.path().join("Gemfile")).unwrap());

        // project root above bin/ wins over cwd
        fs::write(root.path().join("Gemfile"), "").unwrap();
        let found = resolve_gemfile(None, &executable, Some(cwd.path())).unwrap().unwrap();
        assert_eq!(found, fs::canonicalize(root.path().join("Gemfile")).unwrap());

        // explicit path must exist
        let explicit = cwd.path().join("Gemfile");
        let found = resolve_gemfile(Some(&explicit), &executable, None).unwrap().unwrap();
        assert_eq!(found, fs::canonicalize(&explicit).unwrap());
        assert!(resolve_gemfile(Some(Path::new("/nonexistent/Gemfile")), &executable, None).is_err());
    }

    #[test]
    fn test_prepare_workspace_missing_conf() {
        let args = args_for(PathBuf::from("/nonexistent/in.conf"), Vec::new());
        let err = prepare_workspace(&args, Path::new("fluentd")).unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}

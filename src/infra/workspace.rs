//! Run workspace - temp directory holding the generated config and plugins

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Monitor endpoint source, always placed ahead of caller content
pub const MONITOR_SOURCE_BLOCK: &str = "<source>\n  @type monitor_agent\n</source>\n";

/// Subdirectory for dynamically supplied plugin code
pub const PLUGIN_DIR: &str = "plugin";

/// Outcome of a best-effort cleanup step. Failures are reported here and
/// logged, never turned into errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum BestEffort {
    Done,
    Failed(String),
}

/// Encoding of the generated config file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    #[default]
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "utf-16le")]
    Utf16Le,
    #[serde(rename = "utf-16be")]
    Utf16Be,
}

impl TextEncoding {
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Utf16Le => text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect(),
            TextEncoding::Utf16Be => text.encode_utf16().flat_map(|u| u.to_be_bytes()).collect(),
        }
    }
}

impl std::str::FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "utf-16le" | "utf16le" => Ok(TextEncoding::Utf16Le),
            "utf-16be" | "utf16be" => Ok(TextEncoding::Utf16Be),
            other => Err(format!("unsupported encoding: {}", other)),
        }
    }
}

/// One run-scoped temporary directory
#[derive(Debug)]
pub struct RunWorkspace {
    dir: TempDir,
}

impl RunWorkspace {
    pub fn create() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("procbench-").tempdir()?;
        debug!(path = %dir.path().display(), "Workspace created");
        Ok(Self { dir })
    }

    pub fn create_in(parent: impl AsRef<Path>) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("procbench-").tempdir_in(parent)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `name` with the monitor source block followed by `content`
    pub fn create_conf_file(&self, name: &str, content: &str, encoding: TextEncoding) -> io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        let mut text = String::with_capacity(MONITOR_SOURCE_BLOCK.len() + content.len());
        text.push_str(MONITOR_SOURCE_BLOCK);
        text.push_str(content);
        fs::write(&path, encoding.encode(&text))?;
        Ok(path)
    }

    /// Write a plugin source file under `plugin/`
    pub fn create_plugin_file(&self, name: &str, content: &str) -> io::Result<PathBuf> {
        let path = self.dir.path().join(PLUGIN_DIR).join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Delete the directory tree. A file still held open by a slow-exiting
    /// process can make this fail; that is reported, not raised.
    pub fn remove(self) -> BestEffort {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => {
                debug!(path = %path.display(), "Workspace removed");
                BestEffort::Done
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove workspace");
                BestEffort::Failed(e.to_string())
            }
        }
    }
}

/// `[executable, "-c", conf, extra...]`
pub fn build_command(executable: &str, conf_path: &Path, extra: &[String]) -> Vec<String> {
    let mut command = vec![
        executable.to_string(),
        "-c".to_string(),
        conf_path.to_string_lossy().into_owned(),
    ];
    command.extend(extra.iter().cloned());
    command
}

//! Output drainer - non-blocking collection of a child's stdout/stderr

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::time::{sleep, timeout, timeout_at, Instant};

const READ_CHUNK: usize = 4096;

/// Upper bound on bytes taken in one drain so a chatty worker cannot starve the loop
const MAX_DRAIN_BYTES: usize = 1 << 20;

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Accumulates the combined output of a child process.
///
/// Bytes are buffered until a line terminator arrives; `take_lines` only
/// hands out complete lines and keeps the trailing partial line.
#[derive(Debug)]
pub struct OutputDrainer {
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    pending: Vec<u8>,
}

impl OutputDrainer {
    pub fn new(stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) -> Self {
        Self {
            stdout,
            stderr,
            pending: Vec::new(),
        }
    }

    /// Both streams reached EOF
    pub fn is_closed(&self) -> bool {
        self.stdout.is_none() && self.stderr.is_none()
    }

    /// Wait up to `wait` for output, then read whatever else is already
    /// available without blocking. Returns the newly read text (empty if
    /// nothing was ready).
    ///
    /// When both streams are closed this just sleeps for `wait`, so a
    /// polling caller does not spin.
    pub async fn drain(&mut self, wait: Duration) -> String {
        if self.is_closed() {
            if !wait.is_zero() {
                sleep(wait).await;
            }
            return String::new();
        }

        let mut fresh = Vec::new();
        match timeout(wait, self.read_chunk()).await {
            Ok(Some(chunk)) => fresh.extend_from_slice(&chunk),
            _ => return String::new(),
        }
        while fresh.len() < MAX_DRAIN_BYTES {
            match timeout(Duration::ZERO, self.read_chunk()).await {
                Ok(Some(chunk)) => fresh.extend_from_slice(&chunk),
                _ => break,
            }
        }

        self.pending.extend_from_slice(&fresh);
        String::from_utf8_lossy(&fresh).into_owned()
    }

    /// Read until both streams close or `bound` elapses. Picks up the last
    /// output of a process that has already exited; the bound covers
    /// grandchildren still holding the pipes open.
    pub async fn drain_to_end(&mut self, bound: Duration) {
        let deadline = Instant::now() + bound;
        while !self.is_closed() {
            match timeout_at(deadline, self.read_chunk()).await {
                Ok(Some(chunk)) => self.pending.extend_from_slice(&chunk),
                _ => break,
            }
        }
    }

    /// Complete lines received so far, without terminators
    pub fn take_lines(&mut self) -> Vec<String> {
        let Some(end) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(end + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        complete[..end]
            .split(|b| *b == b'\n')
            .map(|line| {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                String::from_utf8_lossy(line).into_owned()
            })
            .collect()
    }

    /// Remaining unterminated output, if any
    pub fn take_partial(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }

    /// Read one chunk from whichever stream is ready first. `None` once
    /// both streams are closed.
    async fn read_chunk(&mut self) -> Option<Vec<u8>> {
        let mut out_buf = [0u8; READ_CHUNK];
        let mut err_buf = [0u8; READ_CHUNK];

        loop {
            let has_out = self.stdout.is_some();
            let has_err = self.stderr.is_some();
            if !has_out && !has_err {
                return None;
            }

            let (stream, result) = tokio::select! {
                r = read_from(self.stdout.as_mut(), &mut out_buf), if has_out => (Stream::Stdout, r),
                r = read_from(self.stderr.as_mut(), &mut err_buf), if has_err => (Stream::Stderr, r),
            };

            match (stream, result) {
                (Stream::Stdout, Ok(n)) if n > 0 => return Some(out_buf[..n].to_vec()),
                (Stream::Stderr, Ok(n)) if n > 0 => return Some(err_buf[..n].to_vec()),
                (Stream::Stdout, _) => self.stdout = None,
                (Stream::Stderr, _) => self.stderr = None,
            }
        }
    }

    #[cfg(test)]
    fn feed(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }
}

async fn read_from<R: AsyncRead + Unpin>(reader: Option<&mut R>, buf: &mut [u8]) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_lines_keeps_partial() {
        let mut drainer = OutputDrainer::new(None, None);
        drainer.feed(b"starting fluentd-1.16.2 pid=10\r\nstarting fluentd wor");

        assert_eq!(drainer.take_lines(), vec!["starting fluentd-1.16.2 pid=10".to_string()]);
        assert!(drainer.take_lines().is_empty());

        drainer.feed(b"ker pid=11 \n\n");
        assert_eq!(
            drainer.take_lines(),
            vec!["starting fluentd worker pid=11 ".to_string(), String::new()]
        );
        assert_eq!(drainer.take_partial(), None);
    }

    #[test]
    fn test_take_partial() {
        let mut drainer = OutputDrainer::new(None, None);
        drainer.feed(b"line\ntail");
        drainer.take_lines();
        assert_eq!(drainer.take_partial(), Some("tail".to_string()));
        assert_eq!(drainer.take_partial(), None);
    }

    #[tokio::test]
    async fn test_closed_drainer_returns_empty() {
        let mut drainer = OutputDrainer::new(None, None);
        assert!(drainer.is_closed());
        assert_eq!(drainer.drain(Duration::from_millis(10)).await, "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_drains_stdout_and_stderr() {
        use crate::config::RunConfig;
        use crate::infra::process::ProcessHandle;

        let config = RunConfig::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo out; echo err 1>&2; sleep 0.2; printf partial".to_string(),
        ]);
        let mut handle = ProcessHandle::spawn(&config).unwrap();
        let mut drainer = handle.take_output().unwrap();
        assert!(handle.take_output().is_none());

        let mut text = String::new();
        for _ in 0..50 {
            text.push_str(&drainer.drain(Duration::from_millis(100)).await);
            if drainer.is_closed() {
                break;
            }
        }

        assert!(text.contains("out"));
        assert!(text.contains("err"));
        let mut lines = drainer.take_lines();
        lines.sort();
        assert_eq!(lines, vec!["err".to_string(), "out".to_string()]);
        assert_eq!(drainer.take_partial(), Some("partial".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_drain_to_end_after_exit() {
        use crate::config::RunConfig;
        use crate::infra::process::ProcessHandle;

        let config = RunConfig::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo first; echo last".to_string(),
        ]);
        let mut handle = ProcessHandle::spawn(&config).unwrap();
        let mut drainer = handle.take_output().unwrap();
        assert!(handle.wait_for_exit(Duration::from_secs(5)).await);

        drainer.drain_to_end(Duration::from_secs(2)).await;
        assert!(drainer.is_closed());
        assert_eq!(drainer.take_lines(), vec!["first".to_string(), "last".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_drain_without_output_waits_then_returns_empty() {
        use crate::config::RunConfig;
        use crate::infra::process::ProcessHandle;

        let config = RunConfig::new(vec!["sleep".to_string(), "5".to_string()]);
        let mut handle = ProcessHandle::spawn(&config).unwrap();
        let mut drainer = handle.take_output().unwrap();

        let started = tokio::time::Instant::now();
        assert_eq!(drainer.drain(Duration::from_millis(200)).await, "");
        assert!(started.elapsed() >= Duration::from_millis(200));

        handle.terminate(Duration::from_secs(2)).await;
    }
}

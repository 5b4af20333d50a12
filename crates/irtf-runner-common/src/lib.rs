//! Child-process plumbing shared by the flag VM and test VM runners.
//!
//! A child is spawned with piped stdout/stderr that are drained on reader threads, while the
//! calling thread polls `try_wait` and runs a caller-supplied tick between polls. The tick is
//! how the driver services its channel while the child is alive.

use std::ffi::OsString;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

pub const DEFAULT_STREAM_CAP_BYTES: usize = 64 * 1024 * 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Program and arguments joined by single spaces, as printed in failure reports.
    pub fn display(&self) -> String {
        let mut out = self.program.display().to_string();
        for a in &self.args {
            out.push(' ');
            out.push_str(a);
        }
        out
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(OsString::from));
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub pid: u32,
    pub exit_code: i32,
    pub exit_signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl ProcessOutput {
    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len());
        out.push_str(&self.stdout);
        out.push_str(&self.stderr);
        out
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Spawns `cmd`, drains its output and blocks until it exits. `on_tick` runs between exit polls;
/// an error from it kills the child and is returned.
pub fn run_process<F>(cmd: &CommandLine, stream_cap: usize, mut on_tick: F) -> Result<ProcessOutput>
where
    F: FnMut() -> Result<()>,
{
    let mut command = cmd.to_command();
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    debug!(command = %cmd.display(), "spawning child process");
    let mut child = command
        .spawn()
        .with_context(|| format!("spawn {}", cmd.program.display()))?;
    let pid = child.id();

    let stdout = child.stdout.take().context("take stdout")?;
    let stderr = child.stderr.take().context("take stderr")?;

    let stdout_thread = std::thread::spawn(move || -> std::io::Result<(Vec<u8>, bool)> {
        read_to_end_capped(stdout, stream_cap)
    });
    let stderr_thread = std::thread::spawn(move || -> std::io::Result<(Vec<u8>, bool)> {
        read_to_end_capped(stderr, stream_cap)
    });

    let status = loop {
        if let Some(status) = child.try_wait().context("try_wait child")? {
            break status;
        }
        if let Err(err) = on_tick() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(err.context(format!("while waiting for child pid {pid}")));
        }
        std::thread::sleep(POLL_INTERVAL);
    };
    on_tick()?;

    let (stdout_bytes, stdout_truncated) = stdout_thread
        .join()
        .unwrap_or_else(|_| Ok((Vec::new(), false)))
        .context("read child stdout")?;
    let (stderr_bytes, stderr_truncated) = stderr_thread
        .join()
        .unwrap_or_else(|_| Ok((Vec::new(), false)))
        .context("read child stderr")?;

    let (exit_code, exit_signal) = exit_code_from_status(status);
    debug!(pid, exit_code, "child process exited");

    Ok(ProcessOutput {
        pid,
        exit_code,
        exit_signal,
        stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
        stdout_truncated,
        stderr_truncated,
    })
}

/// Normalizes an exit status; a signal-terminated child reports `128 + signal`.
pub fn exit_code_from_status(status: std::process::ExitStatus) -> (i32, Option<i32>) {
    #[cfg(unix)]
    let exit_signal = {
        use std::os::unix::process::ExitStatusExt as _;
        status.signal()
    };
    #[cfg(not(unix))]
    let exit_signal: Option<i32> = None;

    let code = match status.code() {
        Some(code) => code,
        None => exit_signal.map(|s| 128 + s).unwrap_or(1),
    };
    (code, exit_signal)
}

pub fn read_to_end_capped<R: Read>(mut reader: R, cap: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = reader.read(&mut tmp)?;
        if n == 0 {
            break;
        }

        if truncated {
            continue;
        }

        let remaining = cap.saturating_sub(buf.len());
        if n <= remaining {
            buf.extend_from_slice(&tmp[..n]);
        } else {
            buf.extend_from_slice(&tmp[..remaining]);
            truncated = true;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_to_end_capped_truncates() {
        let data = vec![7u8; 20_000];
        let (buf, truncated) = read_to_end_capped(&data[..], 10_000).unwrap();
        assert_eq!(buf.len(), 10_000);
        assert!(truncated);

        let (buf, truncated) = read_to_end_capped(&data[..], 50_000).unwrap();
        assert_eq!(buf.len(), 20_000);
        assert!(!truncated);
    }

    #[test]
    fn command_line_display_joins_with_spaces() {
        let mut cmd = CommandLine::new("/usr/bin/java");
        cmd.args(["-Xbatch", "-XX:+PrintIdeal"]).arg("Main");
        assert_eq!(cmd.display(), "/usr/bin/java -Xbatch -XX:+PrintIdeal Main");
    }

    #[cfg(unix)]
    #[test]
    fn run_process_captures_streams_and_exit_code() {
        let mut cmd = CommandLine::new("/bin/sh");
        cmd.args(["-c", "echo out; echo err 1>&2; exit 3"]);
        let mut ticks = 0u32;
        let out = run_process(&cmd, DEFAULT_STREAM_CAP_BYTES, || {
            ticks += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        assert_eq!(out.combined(), "out\nerr\n");
        assert!(ticks >= 1);
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[test]
    fn run_process_maps_signals_to_128_plus_signal() {
        let mut cmd = CommandLine::new("/bin/sh");
        cmd.args(["-c", "kill -ABRT $$"]);
        let out = run_process(&cmd, DEFAULT_STREAM_CAP_BYTES, || Ok(())).unwrap();
        assert_eq!(out.exit_code, 134);
        assert_eq!(out.exit_signal, Some(6));
    }

    #[cfg(unix)]
    #[test]
    fn run_process_honors_working_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cmd = CommandLine::new("/bin/sh");
        cmd.args(["-c", "pwd"]).current_dir(dir.path());
        let out = run_process(&cmd, DEFAULT_STREAM_CAP_BYTES, || Ok(())).unwrap();
        let reported = std::fs::canonicalize(out.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn run_process_reports_spawn_failure() {
        let cmd = CommandLine::new("/definitely/not/a/real/vm");
        let err = run_process(&cmd, DEFAULT_STREAM_CAP_BYTES, || Ok(())).unwrap_err();
        assert!(format!("{err:#}").contains("spawn /definitely/not/a/real/vm"));
    }

    #[cfg(unix)]
    #[test]
    fn tick_error_kills_child() {
        let mut cmd = CommandLine::new("/bin/sh");
        cmd.args(["-c", "sleep 30"]);
        let err = run_process(&cmd, DEFAULT_STREAM_CAP_BYTES, || anyhow::bail!("boom"))
            .unwrap_err();
        assert!(format!("{err:#}").contains("boom"));
    }
}

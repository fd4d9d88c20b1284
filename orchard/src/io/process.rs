//! Helpers for running external tools (`git`, `gh`, `gt`) with timeouts and bounded output.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes read from stdout beyond the capture limit.
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Bytes kept from one pipe plus the count that was drained and dropped.
#[derive(Debug, Default)]
struct Captured {
    kept: Vec<u8>,
    dropped: usize,
}

type Reader = thread::JoinHandle<Result<Captured>>;

/// Run `cmd` to completion or until `timeout`, feeding `stdin` and capturing
/// both output pipes.
///
/// Every pipe is serviced by its own thread, so a child that fills stdout
/// before consuming its input cannot deadlock us. At most `limit` bytes per
/// pipe are kept; the rest is read and counted.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), limit))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    limit: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .inspect_err(|err| error!(err = %err, "spawn failed"))
        .context("spawn command")?;

    let feeder = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            let input = input.to_vec();
            Some(thread::spawn(move || pipe.write_all(&input)))
        }
        (Some(_), None) => return Err(anyhow!("stdin was not piped")),
        _ => None,
    };
    let stdout = spawn_reader(child.stdout.take(), limit, "stdout")?;
    let stderr = spawn_reader(child.stderr.take(), limit, "stderr")?;

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("reap killed command")?, true)
        }
    };

    if let Some(feeder) = feeder {
        match feeder.join() {
            Ok(Ok(())) => {}
            // A child that exits without reading all input closes the pipe early.
            Ok(Err(err)) => debug!(err = %err, "stdin not fully consumed"),
            Err(_) => return Err(anyhow!("stdin writer thread panicked")),
        }
    }
    let stdout = finish(stdout).context("collect stdout")?;
    let stderr = finish(stderr).context("collect stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(stdout_dropped = stdout.dropped, stderr_dropped = stderr.dropped, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout: stdout.kept,
        stderr: stderr.kept,
        stdout_truncated: stdout.dropped,
        stderr_truncated: stderr.dropped,
        timed_out,
    })
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>, limit: usize, name: &str) -> Result<Reader> {
    let pipe = pipe.ok_or_else(|| anyhow!("{name} was not piped"))?;
    Ok(thread::spawn(move || drain_bounded(pipe, limit)))
}

fn finish(reader: Reader) -> Result<Captured> {
    reader
        .join()
        .unwrap_or_else(|_| Err(anyhow!("output reader thread panicked")))
}

fn drain_bounded<R: Read>(mut pipe: R, limit: usize) -> Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(captured);
        }
        let keep = n.min(limit.saturating_sub(captured.kept.len()));
        captured.kept.extend_from_slice(&chunk[..keep]);
        captured.dropped += n - keep;
    }
}

/// A CLI program invoked from a fixed working directory with shared limits.
#[derive(Debug, Clone)]
pub struct Tool {
    program: String,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl Tool {
    pub fn new(
        program: impl Into<String>,
        workdir: impl Into<PathBuf>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            program: program.into(),
            workdir: workdir.into(),
            timeout,
            output_limit_bytes,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn output_limit_bytes(&self) -> usize {
        self.output_limit_bytes
    }

    /// Same program and limits, run from `workdir`.
    pub fn with_workdir(&self, workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            ..self.clone()
        }
    }

    /// Run and return the raw output, whatever the exit status.
    pub fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<CommandOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).current_dir(&self.workdir);
        run_command_with_timeout(cmd, stdin, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run {} {}", self.program, args.join(" ")))
    }

    /// Run and return stdout, failing on timeout or a non-zero exit.
    pub fn run_checked(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<String> {
        let output = self.run(args, stdin)?;
        if output.timed_out {
            return Err(anyhow!(
                "{} {} timed out after {:?}",
                self.program,
                args.join(" "),
                self.timeout
            ));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "{} {} failed: {}",
                self.program,
                args.join(" "),
                output.stderr_text()
            ));
        }
        Ok(output.stdout_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_stdin() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = Tool::new("cat", temp.path(), Duration::from_secs(5), 1024);
        let out = tool.run_checked(&[], Some(b"hello")).expect("run");
        assert_eq!(out, "hello");
    }

    #[test]
    fn output_beyond_limit_is_counted_not_kept() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = Tool::new("cat", temp.path(), Duration::from_secs(5), 4);
        let out = tool.run(&[], Some(b"abcdefgh")).expect("run");
        assert_eq!(out.stdout, b"abcd");
        assert_eq!(out.stdout_truncated, 4);
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = Tool::new("false", temp.path(), Duration::from_secs(5), 1024);
        let err = tool.run_checked(&[], None).expect_err("fails");
        assert!(err.to_string().contains("failed"));
    }
}

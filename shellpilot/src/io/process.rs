//! Run child processes with a timeout and bounded output.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use parking_lot::Mutex;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;

/// How long readers get to drain after the process group is killed.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Captured child process output.
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes discarded beyond the limit, stdout and stderr combined.
    pub truncated: usize,
    pub timed_out: bool,
}

impl CapturedOutput {
    /// Stdout followed by stderr, lossily decoded, with a truncation notice.
    pub fn combined_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.truncated > 0 {
            text.push_str(&format!("\n[output truncated {} bytes]\n", self.truncated));
        }
        text
    }

    /// Exit code, or -1 when the process was killed by a signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }
}

/// Bytes read so far from one stream.
#[derive(Debug, Default)]
struct StreamBuf {
    data: Vec<u8>,
    truncated: usize,
}

/// Run `cmd`, killing its process group once `timeout` elapses.
///
/// Stdout and stderr are drained on reader threads so a chatty child cannot
/// deadlock on a full pipe. Each stream keeps at most `output_limit_bytes`;
/// the rest is discarded but still read.
///
/// The deadline covers the output pipes too: a background job that keeps
/// them open after the shell exits counts as a timeout. On timeout the
/// partial output is returned with `timed_out` set.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CapturedOutput> {
    // `None` when the timeout is too large to represent; then wait without bound.
    let deadline = Instant::now().checked_add(timeout);
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group so a timeout can take down grandchildren too.
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let input = input.to_vec();
        // Feed stdin on its own thread; a child that does not read must not block us.
        thread::spawn(move || {
            if let Err(e) = child_stdin.write_all(&input) {
                debug!(err = %e, "child closed stdin early");
            }
        });
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (done_tx, done_rx) = mpsc::channel();
    let stdout_buf = spawn_reader(stdout, output_limit_bytes, done_tx.clone());
    let stderr_buf = spawn_reader(stderr, output_limit_bytes, done_tx);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            kill_process_group(child.id());
            // The group kill may already have reaped it; a failed kill is fine then.
            if let Err(e) = child.kill() {
                debug!(err = %e, "kill after group kill");
            }
            child.wait().context("wait command after kill")?
        }
    };

    let mut open_streams = 2;
    while open_streams > 0 {
        let wait = if timed_out {
            KILL_GRACE
        } else {
            deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(Instant::now()))
        };
        match done_rx.recv_timeout(wait) {
            Ok(result) => {
                result?;
                open_streams -= 1;
            }
            Err(RecvTimeoutError::Timeout) if !timed_out => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "output still open at the deadline, killing process group"
                );
                timed_out = true;
                kill_process_group(child.id());
            }
            Err(_) => {
                // A reader stuck on a pipe outside our process group; keep what it has.
                debug!(open_streams, "returning partial output");
                break;
            }
        }
    }

    let stdout = std::mem::take(&mut *stdout_buf.lock());
    let stderr = std::mem::take(&mut *stderr_buf.lock());
    let truncated = stdout.truncated + stderr.truncated;
    if truncated > 0 {
        warn!(
            stdout_truncated = stdout.truncated,
            stderr_truncated = stderr.truncated,
            "output truncated"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CapturedOutput {
        status,
        stdout: stdout.data,
        stderr: stderr.data,
        truncated,
        timed_out,
    })
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        // ESRCH: the whole group is already gone.
        debug!(%err, pid, "could not signal process group");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// Drain `reader` into a shared buffer; report on `done` at EOF or error.
fn spawn_reader<R>(reader: R, limit: usize, done: Sender<Result<()>>) -> Arc<Mutex<StreamBuf>>
where
    R: Read + Send + 'static,
{
    let buf = Arc::new(Mutex::new(StreamBuf::default()));
    let shared = Arc::clone(&buf);
    thread::spawn(move || {
        let _ = done.send(read_limited(reader, limit, &shared));
    });
    buf
}

fn read_limited<R: Read>(mut reader: R, limit: usize, buf: &Mutex<StreamBuf>) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(());
        }
        let mut buf = buf.lock();
        let keep = n.min(limit.saturating_sub(buf.data.len()));
        buf.data.extend_from_slice(&chunk[..keep]);
        buf.truncated += n - keep;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_stderr_and_code() {
        let out = run_with_timeout(
            sh("echo out; echo err >&2; exit 3"),
            None,
            Duration::from_secs(10),
            1000,
        )
        .expect("run");
        assert!(!out.timed_out);
        assert_eq!(out.code(), 3);
        assert_eq!(out.combined_text(), "out\nerr\n");
    }

    #[test]
    fn feeds_stdin() {
        let out = run_with_timeout(sh("cat"), Some(b"piped"), Duration::from_secs(10), 1000)
            .expect("run");
        assert_eq!(String::from_utf8_lossy(&out.stdout), "piped");
    }

    #[test]
    fn truncates_beyond_limit() {
        let out = run_with_timeout(sh("printf 0123456789"), None, Duration::from_secs(10), 4)
            .expect("run");
        assert_eq!(out.stdout, b"0123");
        assert_eq!(out.truncated, 6);
        assert!(out.combined_text().contains("[output truncated 6 bytes]"));
    }

    #[test]
    fn timeout_kills_and_keeps_partial_output() {
        let start = Instant::now();
        let out = run_with_timeout(
            sh("echo started; sleep 20; echo never"),
            None,
            Duration::from_millis(500),
            1000,
        )
        .expect("run");
        assert!(out.timed_out);
        assert_eq!(String::from_utf8_lossy(&out.stdout), "started\n");
        assert!(start.elapsed() < Duration::from_secs(15));
    }

    #[test]
    fn background_job_holding_output_does_not_outlive_the_timeout() {
        let start = Instant::now();
        let out = run_with_timeout(sh("sleep 6 & echo hi"), None, Duration::from_secs(1), 1000)
            .expect("run");
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(out.timed_out);
        assert_eq!(String::from_utf8_lossy(&out.stdout), "hi\n");
    }
}

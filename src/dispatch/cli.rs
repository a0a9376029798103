use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{CliError, ExitError};

pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024; // 10MiB per stream

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Appended to captured text when a stream hit `MAX_OUTPUT_BYTES`.
pub const TRUNCATION_MARKER: &str = "\n[output truncated: exceeded 10 MiB capture limit]";

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Successful run of a provider CLI.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    /// Trimmed stdout, with `TRUNCATION_MARKER` appended if it was capped.
    pub stdout: String,
    pub elapsed: Duration,
    pub truncated: bool,
}

/// Keeps at most `MAX_OUTPUT_BYTES`; everything past the cap is dropped.
#[derive(Debug, Default)]
struct BoundedBuffer {
    bytes: Vec<u8>,
    truncated: bool,
}

impl BoundedBuffer {
    fn push(&mut self, chunk: &[u8]) {
        let room = MAX_OUTPUT_BYTES.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn into_text(mut self) -> (String, bool) {
        // The cap can split a multi-byte char; drop the partial tail instead
        // of decoding it as U+FFFD.
        if self.truncated
            && let Err(e) = std::str::from_utf8(&self.bytes)
            && e.error_len().is_none()
        {
            self.bytes.truncate(e.valid_up_to());
        }
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        // Invalid bytes decode to 3-byte U+FFFD, so the text can outgrow the cap.
        if text.len() > MAX_OUTPUT_BYTES {
            let mut end = MAX_OUTPUT_BYTES;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
            self.truncated = true;
        }
        (text.trim().to_string(), self.truncated)
    }
}

/// Reads a pipe to EOF. The pipe is always drained so the child never
/// blocks on a full pipe buffer, even after the cap is hit.
async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<BoundedBuffer> {
    let mut buf = BoundedBuffer::default();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buf);
        }
        buf.push(&chunk[..n]);
    }
}

/// Runs one provider command. Held by each adapter; every `run` call owns
/// its own subprocess.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    provider: String,
    command: String,
    timeout: Duration,
}

impl ProcessExecutor {
    /// A zero timeout means `DEFAULT_TIMEOUT`.
    pub fn new(provider: impl Into<String>, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider: provider.into(),
            command: command.into(),
            timeout: if timeout.is_zero() {
                DEFAULT_TIMEOUT
            } else {
                timeout
            },
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve the executable on PATH (or as a direct path).
    pub fn resolve(&self) -> Result<PathBuf, CliError> {
        which::which(&self.command)
            .map_err(|e| CliError::not_found(&self.provider, &self.command, e))
    }

    pub fn is_available(&self) -> bool {
        which::which(&self.command).is_ok()
    }

    /// Execute the command and return trimmed stdout.
    ///
    /// - No shell: `Command::new` + `.args`, so prompts are never interpolated
    /// - Own process group, killed as a whole on timeout or cancellation
    /// - `kill_on_drop(true)` covers callers dropping the future
    /// - stdout/stderr capped at `MAX_OUTPUT_BYTES` each
    /// - stdin closed so tools never wait for terminal input
    pub async fn run(
        &self,
        args: &[String],
        working_dir: Option<&Path>,
        cancel: Option<&CancellationToken>,
    ) -> Result<CapturedOutput, CliError> {
        let program = self.resolve()?;
        let start = Instant::now();

        tracing::debug!(
            provider = %self.provider,
            command = %self.command,
            ?args,
            working_dir = ?working_dir,
            "spawning provider CLI"
        );

        let mut cmd = Command::new(&program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            CliError::process_failed(
                &self.provider,
                format!("failed to spawn {}: {e}", self.command),
            )
            .with_source(e)
        })?;

        // process_group(0) makes the child its own group leader (pgid == pid).
        // Armed until the child has been reaped, so a caller dropping this
        // future still takes down grandchildren, not just the leader.
        let mut group = GroupGuard::new(child.id());

        let (Some(stdout_pipe), Some(stderr_pipe)) = (child.stdout.take(), child.stderr.take())
        else {
            return Err(CliError::process_failed(
                &self.provider,
                format!("stdio pipes unavailable for {}", self.command),
            ));
        };

        let run = async {
            let (stdout, stderr) = tokio::try_join!(drain(stdout_pipe), drain(stderr_pipe))?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((stdout, stderr, status))
        };

        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            res = tokio::time::timeout(self.timeout, run) => res,
            () = cancelled => {
                group.kill();
                tracing::warn!(provider = %self.provider, command = %self.command, "provider CLI cancelled");
                return Err(CliError::cancelled(&self.provider));
            }
        };

        let (stdout, stderr, status) = match outcome {
            Ok(Ok(captured)) => {
                group.disarm();
                captured
            }
            Ok(Err(e)) => {
                group.kill();
                return Err(CliError::process_failed(
                    &self.provider,
                    format!("failed to read from {}: {e}", self.command),
                )
                .with_source(e));
            }
            Err(elapsed) => {
                group.kill();
                tracing::warn!(
                    provider = %self.provider,
                    command = %self.command,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "provider CLI timed out"
                );
                return Err(CliError::timeout(&self.provider, self.timeout, elapsed));
            }
        };

        let elapsed = start.elapsed();
        let (stderr_text, stderr_truncated) = stderr.into_text();

        if !status.success() {
            tracing::warn!(
                provider = %self.provider,
                command = %self.command,
                code = status.code().unwrap_or(-1),
                elapsed_ms = elapsed.as_millis() as u64,
                "provider CLI failed"
            );
            let message = if stderr_text.is_empty() {
                "command failed".to_string()
            } else if stderr_truncated {
                format!("{stderr_text}{TRUNCATION_MARKER}")
            } else {
                stderr_text
            };
            return Err(
                CliError::process_failed(&self.provider, message).with_source(ExitError(status))
            );
        }

        // Progress chatter on stderr is normal for these tools.
        if !stderr_text.is_empty() {
            tracing::debug!(provider = %self.provider, stderr = %stderr_text, "provider CLI stderr output");
        }

        let (mut text, truncated) = stdout.into_text();
        if truncated {
            tracing::warn!(
                provider = %self.provider,
                limit = MAX_OUTPUT_BYTES,
                "provider CLI stdout truncated"
            );
            text.push_str(TRUNCATION_MARKER);
        }

        tracing::debug!(
            provider = %self.provider,
            elapsed_ms = elapsed.as_millis() as u64,
            bytes = text.len(),
            "provider CLI finished"
        );

        Ok(CapturedOutput {
            stdout: text,
            elapsed,
            truncated,
        })
    }
}

/// Kills the child's process group when dropped, unless disarmed.
struct GroupGuard {
    pid: Option<u32>,
}

impl GroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    fn kill(&mut self) {
        kill_process_group(self.pid.take());
    }

    fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Kill the whole process group, not just the leader: grandchildren holding
/// the pipes open would otherwise keep the readers waiting for EOF.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_buffer_drops_bytes_past_cap() {
        let mut buf = BoundedBuffer::default();
        buf.push(&vec![b'a'; MAX_OUTPUT_BYTES - 1]);
        assert!(!buf.truncated);
        buf.push(b"bcd");
        assert!(buf.truncated);
        assert_eq!(buf.bytes.len(), MAX_OUTPUT_BYTES);
        assert_eq!(buf.bytes.last(), Some(&b'b'));
    }

    #[test]
    fn truncated_text_cut_on_char_boundary() {
        let mut buf = BoundedBuffer::default();
        buf.push(&vec![b'a'; MAX_OUTPUT_BYTES - 1]);
        buf.push("é".as_bytes());
        let (text, truncated) = buf.into_text();
        assert!(truncated);
        assert_eq!(text.len(), MAX_OUTPUT_BYTES - 1);
        assert!(!text.contains('\u{FFFD}'));
    }

    #[test]
    fn invalid_utf8_stays_within_cap() {
        let mut buf = BoundedBuffer::default();
        buf.push(&vec![0xFF; MAX_OUTPUT_BYTES + 10]);
        let (text, truncated) = buf.into_text();
        assert!(truncated);
        assert!(text.len() <= MAX_OUTPUT_BYTES, "text is {} bytes", text.len());
        assert!(text.chars().all(|c| c == '\u{FFFD}'));
    }

    #[test]
    fn invalid_utf8_under_byte_cap_is_still_capped() {
        let mut buf = BoundedBuffer::default();
        buf.push(&vec![0xFE; MAX_OUTPUT_BYTES / 2]);
        assert!(!buf.truncated);
        let (text, truncated) = buf.into_text();
        assert!(truncated);
        assert!(text.len() <= MAX_OUTPUT_BYTES);
    }

    #[test]
    fn zero_timeout_means_default() {
        let exec = ProcessExecutor::new("p", "true", Duration::ZERO);
        assert_eq!(exec.timeout(), DEFAULT_TIMEOUT);
    }
}

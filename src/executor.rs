//! Command execution for extracted step commands.
//!
//! The orchestrator only sees the [`CommandExecutor`] trait. [`ShellExecutor`]
//! is the real implementation: it hands each command to `<shell> -c` in the
//! town root and captures stdout followed by stderr.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Environment variable carrying the town root into every command.
pub const TOWN_ROOT_ENV: &str = "TOWN_ROOT";
/// Environment variable carrying the id of the step being executed.
pub const STEP_ENV: &str = "TOWNMIG_STEP";

/// Where and on whose behalf a command runs.
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// Working directory, also exported as `TOWN_ROOT`
    pub town_root: PathBuf,
    /// Step the command belongs to
    pub step_id: String,
}

impl ExecContext {
    pub fn new(town_root: impl AsRef<Path>, step_id: impl Into<String>) -> Self {
        Self {
            town_root: town_root.as_ref().to_path_buf(),
            step_id: step_id.into(),
        }
    }
}

/// A command that did not succeed. `output` holds whatever was captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub message: String,
    pub output: String,
}

impl CommandFailure {
    pub fn new(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            output: output.into(),
        }
    }
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Runs one extracted command to completion.
///
/// Implementations block until the command finishes; the orchestrator never
/// has more than one command in flight.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &str, ctx: &ExecContext) -> Result<String, CommandFailure>;
}

/// Executes commands as shell scripts.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
    timeout: Option<Duration>,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new("bash", None)
    }
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            shell: shell.into(),
            timeout,
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, command: &str, ctx: &ExecContext) -> Result<String, CommandFailure> {
        debug!(
            step = %ctx.step_id,
            shell = %self.shell,
            "Executing command:\n{}",
            command
        );

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.town_root)
            .env(TOWN_ROOT_ENV, &ctx.town_root)
            .env(STEP_ENV, &ctx.step_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CommandFailure::new(format!("Failed to spawn {}: {}", self.shell, e), "")
            })?;

        let mut stdout = OutputBuffer::drain(child.stdout.take());
        let mut stderr = OutputBuffer::drain(child.stderr.take());

        let waited = match self.timeout {
            Some(limit) => match timeout(limit, child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(step = %ctx.step_id, "Command timed out after {:?}", limit);
                    if let Err(e) = child.kill().await {
                        warn!(step = %ctx.step_id, "Failed to kill timed out command: {}", e);
                    }
                    // Grandchildren may still hold the pipes open.
                    let _ = timeout(OUTPUT_GRACE, async {
                        stdout.finish().await;
                        stderr.finish().await;
                    })
                    .await;
                    return Err(CommandFailure::new(
                        format!("Command timed out after {:?}", limit),
                        combine(&stdout.snapshot(), &stderr.snapshot()),
                    ));
                }
            },
            None => child.wait().await,
        };

        stdout.finish().await;
        stderr.finish().await;
        let stdout = stdout.snapshot();
        let stderr = stderr.snapshot();
        let combined = combine(&stdout, &stderr);

        let status = waited.map_err(|e| {
            CommandFailure::new(format!("Failed to wait for command: {}", e), combined.clone())
        })?;

        if status.success() {
            return Ok(combined);
        }

        let message = match status.code() {
            Some(code) => format!("Command exited with code {}", code),
            None => "Command terminated by signal".to_string(),
        };
        let message = match stderr.trim().lines().last() {
            Some(last) if !last.is_empty() => format!("{}: {}", message, last),
            _ => message,
        };
        Err(CommandFailure::new(message, combined))
    }
}

/// How long a timed out command's pipes are drained after the kill.
const OUTPUT_GRACE: Duration = Duration::from_millis(200);

/// A child pipe read on a background task into a shared buffer, so the bytes
/// seen so far survive a timeout.
struct OutputBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl OutputBuffer {
    fn drain<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let bytes = Arc::new(Mutex::new(Vec::new()));
        let reader = pipe.map(|mut pipe| {
            let bytes = Arc::clone(&bytes);
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) => break,
                        Ok(n) => bytes
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .extend_from_slice(&chunk[..n]),
                        Err(e) => {
                            debug!("Stopped reading command output: {}", e);
                            break;
                        }
                    }
                }
            })
        });
        Self { bytes, reader }
    }

    /// Wait for the reader to hit end of file.
    async fn finish(&mut self) {
        if let Some(reader) = self.reader.as_mut() {
            let _ = reader.await;
            self.reader = None;
        }
    }

    fn snapshot(&self) -> String {
        let bytes = self
            .bytes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Drop for OutputBuffer {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

fn combine(stdout: &str, stderr: &str) -> String {
    let mut combined = String::with_capacity(stdout.len() + stderr.len());
    combined.push_str(stdout);
    combined.push_str(stderr);
    combined
}

//! Subprocess execution on the tokio runtime.
//!
//! Spawns the command directly (no shell), captures stdout/stderr up to a
//! byte cap, and optionally enforces a timeout. Children are killed when
//! their handle is dropped, which covers both timeouts and overflow.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{CommandSpec, ProcessOutput, ProcessRunner, RunLimits};

/// Errors from running an external process
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' failed with exit code {}: {stderr}", exit_code_label(.code))]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("'{program}' timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("'{program}' produced more than {limit} bytes of output")]
    OutputLimitExceeded { program: String, limit: usize },

    #[error("I/O error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

fn exit_code_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none (killed by signal)".to_string())
}

enum Capture {
    Io(std::io::Error),
    Overflow,
}

/// Process runner backed by `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    fn name(&self) -> &str {
        "tokio"
    }

    async fn run(
        &self,
        command: &CommandSpec,
        limits: RunLimits,
    ) -> Result<ProcessOutput, ProcessError> {
        let program = command.program.clone();
        debug!(command = %command, timeout = ?limits.timeout, "Spawning process");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Launch {
                program: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let max = limits.max_output_bytes;

        let collect = async {
            let (out, err) =
                tokio::try_join!(read_capped(stdout, max), read_capped(stderr, max))?;
            let status: ExitStatus = child.wait().await.map_err(Capture::Io)?;
            Ok::<_, Capture>((status, out, err))
        };

        let outcome = match limits.timeout {
            Some(limit) => match timeout(limit, collect).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(ProcessError::TimedOut {
                        program,
                        timeout: limit,
                    })
                }
            },
            None => collect.await,
        };

        let (status, stdout, stderr) = match outcome {
            Ok(captured) => captured,
            Err(Capture::Overflow) => {
                return Err(ProcessError::OutputLimitExceeded {
                    program,
                    limit: max,
                })
            }
            Err(Capture::Io(source)) => return Err(ProcessError::Io { program, source }),
        };

        if !status.success() {
            return Err(ProcessError::NonZeroExit {
                program,
                code: status.code(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }

        Ok(ProcessOutput { stdout, stderr })
    }
}

/// Read a pipe to EOF, failing fast once it exceeds `limit` bytes
async fn read_capped<R>(reader: Option<R>, limit: usize) -> Result<Vec<u8>, Capture>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(reader) = reader {
        reader
            .take(limit as u64 + 1)
            .read_to_end(&mut buf)
            .await
            .map_err(Capture::Io)?;
    }

    if buf.len() > limit {
        return Err(Capture::Overflow);
    }
    Ok(buf)
}

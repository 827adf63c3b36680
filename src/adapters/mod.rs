//! Adapter interfaces for external tooling.
//!
//! Adapters wrap the processes the engine shells out to: the database's
//! dump utility, either on the host or inside a throwaway container.

pub mod dump;
pub mod process;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

pub use dump::{
    ConnectionParams, ContainerNetwork, DumpCommand, DumpMode, DumpSettings, DumpStrategy,
    DumpTarget, Platform, ToolAvailability,
};
pub use process::{ProcessError, TokioProcessRunner};

/// A fully resolved external command
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute (looked up on PATH)
    pub program: String,

    /// Arguments, passed without a shell
    pub args: Vec<String>,

    /// Extra environment variables for the child process
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Value of the argument following `flag`, if present
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

// Env values are redacted: they carry the database password.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, _) in &self.env {
            write!(f, "{}=*** ", key)?;
        }
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandSpec({})", self)
    }
}

/// Bounds applied to a single process execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    /// Kill the process after this long; `None` waits for it to finish
    pub timeout: Option<Duration>,

    /// Maximum bytes captured from each of stdout and stderr
    pub max_output_bytes: usize,
}

impl RunLimits {
    /// Short, bounded execution for availability probes
    pub fn probe(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            max_output_bytes: 64 * 1024,
        }
    }

    /// Unbounded duration with a generous output buffer, for dumps
    pub fn dump(max_output_bytes: usize) -> Self {
        Self {
            timeout: None,
            max_output_bytes,
        }
    }
}

/// Captured output of a successful process
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Trait for executing external commands
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Human-readable runner name
    fn name(&self) -> &str;

    /// Run a command to completion.
    ///
    /// Returns an error if the process cannot be launched, exits non-zero,
    /// exceeds the timeout, or overflows the output buffer.
    async fn run(&self, command: &CommandSpec, limits: RunLimits)
        -> Result<ProcessOutput, ProcessError>;
}

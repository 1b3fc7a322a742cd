//! Managed-process collaborator.
//!
//! The relay never talks to the game server directly. Everything goes through
//! [`ManagedProcess`]: a continuous log tail, one-shot "send command"
//! executions, and restart. [`docker::DockerProcess`] is the production
//! implementation.

pub mod docker;

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

pub use docker::DockerProcess;

/// A stream of raw output chunks from a child process pipe.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// A running log tail: its two output pipes plus the handle that owns the child.
pub struct LogTail {
    /// Standard output chunks, in the order produced.
    pub stdout: ByteStream,
    /// Standard error chunks.
    pub stderr: ByteStream,
    /// Owner of the underlying child process.
    pub handle: Box<dyn TailHandle>,
}

/// Ownership of a tail subprocess.
#[async_trait]
pub trait TailHandle: Send {
    /// Wait for the process to exit, yielding its exit code if it has one.
    async fn wait(&mut self) -> io::Result<Option<i32>>;

    /// Signal the process to terminate without waiting for it.
    fn start_kill(&mut self) -> io::Result<()>;
}

/// Captured result of a one-shot execution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit code, `None` when terminated by a signal.
    pub exit_code: Option<i32>,
}

impl ExecOutput {
    /// Whether the process exited with status 0.
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Failures talking to the managed process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The program could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Reading output or waiting on the child failed.
    #[error("process I/O failed: {0}")]
    Io(#[from] io::Error),
    /// A one-shot execution outlived its timeout and was killed.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    /// A pipe we asked for was not attached to the child.
    #[error("child {0} pipe unavailable")]
    MissingPipe(&'static str),
}

/// Operations the relay needs from the managed process.
#[async_trait]
pub trait ManagedProcess: Send + Sync {
    /// Start a continuous tail of the process's log output.
    fn tail_logs(&self) -> Result<LogTail, ProcessError>;

    /// Forward a validated console command.
    async fn send_command(&self, payload: &str) -> Result<ExecOutput, ProcessError>;

    /// Restart the managed process.
    async fn restart(&self) -> Result<ExecOutput, ProcessError>;
}

//! Command dispatcher: runs admitted commands against the managed process
//! and broadcasts clean results to every streaming session.

use std::sync::Arc;
use std::time::Instant;

use admincraft_core::AdmittedCommand;
use metrics::{counter, histogram};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::metrics::{DISPATCH_DURATION_SECONDS, DISPATCH_FAILURES_TOTAL, DISPATCH_TOTAL};
use crate::process::ManagedProcess;
use crate::websocket::registry::SessionRegistry;

/// What an admitted command turns into.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// Restart the managed process.
    Restart,
    /// Forward the payload as a console command.
    SendCommand(String),
}

impl Instruction {
    fn kind(&self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::SendCommand(_) => "send_command",
        }
    }
}

/// How a dispatch ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Stdout was queued for this many sessions.
    Broadcast {
        /// Sessions the output was queued for.
        recipients: usize,
    },
    /// Spawn, I/O, timeout, or non-zero exit. Logged only.
    Failed,
    /// The command wrote to stderr. Logged only.
    ErrorOutput,
}

/// Executes admitted commands out-of-band.
pub struct CommandDispatcher {
    process: Arc<dyn ManagedProcess>,
    registry: Arc<SessionRegistry>,
    restart_command: String,
}

impl CommandDispatcher {
    /// Create a dispatcher. `restart_command` is the literal that maps to [`Instruction::Restart`].
    pub fn new(
        process: Arc<dyn ManagedProcess>,
        registry: Arc<SessionRegistry>,
        restart_command: impl Into<String>,
    ) -> Self {
        Self {
            process,
            registry,
            restart_command: restart_command.into(),
        }
    }

    /// Map an admitted command to an instruction.
    pub fn classify(&self, command: &AdmittedCommand) -> Instruction {
        if command.as_str() == self.restart_command {
            Instruction::Restart
        } else {
            Instruction::SendCommand(command.as_str().to_owned())
        }
    }

    /// Run `command` on a background task so the caller's loop never waits on it.
    pub fn dispatch(self: &Arc<Self>, command: AdmittedCommand) -> JoinHandle<DispatchOutcome> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.execute(command).await })
    }

    /// Execute `command` and broadcast its stdout if, and only if, it succeeded cleanly.
    pub async fn execute(&self, command: AdmittedCommand) -> DispatchOutcome {
        let instruction = self.classify(&command);
        let kind = instruction.kind();
        counter!(DISPATCH_TOTAL, "kind" => kind).increment(1);

        let start = Instant::now();
        let result = match &instruction {
            Instruction::Restart => {
                info!("restarting managed process");
                self.process.restart().await
            }
            Instruction::SendCommand(payload) => self.process.send_command(payload).await,
        };
        histogram!(DISPATCH_DURATION_SECONDS, "kind" => kind)
            .record(start.elapsed().as_secs_f64());

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                counter!(DISPATCH_FAILURES_TOTAL, "reason" => "error").increment(1);
                error!(command = command.as_str(), error = %e, "command execution failed");
                return DispatchOutcome::Failed;
            }
        };
        if !output.succeeded() {
            counter!(DISPATCH_FAILURES_TOTAL, "reason" => "exit_status").increment(1);
            error!(
                command = command.as_str(),
                exit_code = ?output.exit_code,
                stderr = output.stderr.trim_end(),
                "command exited unsuccessfully"
            );
            return DispatchOutcome::Failed;
        }
        if !output.stderr.is_empty() {
            counter!(DISPATCH_FAILURES_TOTAL, "reason" => "stderr").increment(1);
            error!(
                command = command.as_str(),
                stderr = output.stderr.trim_end(),
                "command wrote to stderr"
            );
            return DispatchOutcome::ErrorOutput;
        }

        info!(command = command.as_str(), stdout = output.stdout.trim_end(), "command succeeded");
        let recipients = self.registry.broadcast(output.stdout).await;
        DispatchOutcome::Broadcast { recipients }
    }
}

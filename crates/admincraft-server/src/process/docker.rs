//! Docker CLI backed [`ManagedProcess`].

use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};

use admincraft_settings::{CommandSettings, ProcessSettings};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::process::{Child, Command};
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::{ExecOutput, LogTail, ManagedProcess, ProcessError, TailHandle};

/// Drives a container through the `docker` CLI.
///
/// Arguments are passed as an argv vector, never through a shell.
#[derive(Clone, Debug)]
pub struct DockerProcess {
    docker_bin: String,
    container: String,
    exec_timeout: Duration,
}

impl DockerProcess {
    /// Create a collaborator for `container`.
    pub fn new(
        docker_bin: impl Into<String>,
        container: impl Into<String>,
        exec_timeout: Duration,
    ) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            container: container.into(),
            exec_timeout,
        }
    }

    /// Build from loaded settings.
    pub fn from_settings(process: &ProcessSettings, commands: &CommandSettings) -> Self {
        Self::new(
            process.docker_bin.clone(),
            process.container.clone(),
            Duration::from_secs(commands.exec_timeout_secs),
        )
    }

    /// Target container name.
    pub fn container(&self) -> &str {
        &self.container
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.docker_bin);
        let _ = cmd
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn(&self, args: &[String]) -> Result<Child, ProcessError> {
        debug!(program = %self.docker_bin, ?args, "spawning");
        self.command(args).spawn().map_err(|source| ProcessError::Spawn {
            program: self.docker_bin.clone(),
            source,
        })
    }

    async fn exec(&self, args: Vec<String>) -> Result<ExecOutput, ProcessError> {
        let start = Instant::now();
        let child = self.spawn(&args)?;

        // Dropping the timed-out future drops the child, which kills it.
        let output = tokio::time::timeout(self.exec_timeout, child.wait_with_output())
            .await
            .map_err(|_| ProcessError::Timeout(self.exec_timeout))??;

        let result = ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };
        debug!(
            ?args,
            exit_code = ?result.exit_code,
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "docker command completed"
        );
        Ok(result)
    }
}

#[async_trait]
impl ManagedProcess for DockerProcess {
    fn tail_logs(&self) -> Result<LogTail, ProcessError> {
        let mut child = self.spawn(&tail_args(&self.container))?;
        let stdout = child.stdout.take().ok_or(ProcessError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(ProcessError::MissingPipe("stderr"))?;
        Ok(LogTail {
            stdout: ReaderStream::new(stdout).boxed(),
            stderr: ReaderStream::new(stderr).boxed(),
            handle: Box::new(child),
        })
    }

    async fn send_command(&self, payload: &str) -> Result<ExecOutput, ProcessError> {
        self.exec(send_command_args(&self.container, payload)).await
    }

    async fn restart(&self) -> Result<ExecOutput, ProcessError> {
        self.exec(restart_args(&self.container)).await
    }
}

#[async_trait]
impl TailHandle for Child {
    async fn wait(&mut self) -> io::Result<Option<i32>> {
        Child::wait(self).await.map(|status| status.code())
    }

    fn start_kill(&mut self) -> io::Result<()> {
        Child::start_kill(self)
    }
}

/// `docker logs -f <container>`
pub fn tail_args(container: &str) -> Vec<String> {
    vec!["logs".into(), "-f".into(), container.into()]
}

/// `docker exec <container> send-command <words...>`
///
/// The payload is already restricted to `[A-Za-z0-9_ -]`; splitting on
/// whitespace reproduces what a shell would have passed as argv.
pub fn send_command_args(container: &str, payload: &str) -> Vec<String> {
    let mut args = vec!["exec".into(), container.into(), "send-command".into()];
    args.extend(payload.split_whitespace().map(str::to_owned));
    args
}

/// `docker restart <container>`
pub fn restart_args(container: &str) -> Vec<String> {
    vec!["restart".into(), container.into()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_arguments() {
        assert_eq!(tail_args("minecraft"), ["logs", "-f", "minecraft"]);
    }

    #[test]
    fn send_command_splits_words() {
        assert_eq!(
            send_command_args("minecraft", "say hello  world"),
            ["exec", "minecraft", "send-command", "say", "hello", "world"]
        );
    }

    #[test]
    fn send_command_keeps_hyphens_and_underscores() {
        assert_eq!(
            send_command_args("mc", "gamerule do_daylight_cycle -1"),
            ["exec", "mc", "send-command", "gamerule", "do_daylight_cycle", "-1"]
        );
    }

    #[test]
    fn restart_arguments() {
        assert_eq!(restart_args("survival"), ["restart", "survival"]);
    }

    #[test]
    fn from_settings_uses_configured_values() {
        let process = ProcessSettings {
            docker_bin: "/usr/local/bin/docker".into(),
            container: "mc-prod".into(),
            ..ProcessSettings::default()
        };
        let docker = DockerProcess::from_settings(&process, &CommandSettings::default());
        assert_eq!(docker.container(), "mc-prod");
        assert_eq!(docker.docker_bin, "/usr/local/bin/docker");
        assert_eq!(docker.exec_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let docker = DockerProcess::new(
            "/nonexistent/docker-binary",
            "minecraft",
            Duration::from_secs(1),
        );
        let err = docker.send_command("list").await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert!(matches!(docker.tail_logs(), Err(ProcessError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_captures_output_and_exit_code() {
        // `sh -c <script> ...` stands in for the docker CLI.
        let docker = DockerProcess::new("sh", "unused", Duration::from_secs(5));
        let out = docker
            .exec(vec!["-c".into(), "echo out; echo err >&2; exit 3".into()])
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.succeeded());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_times_out() {
        let docker = DockerProcess::new("sh", "unused", Duration::from_millis(50));
        let err = docker
            .exec(vec!["-c".into(), "sleep 10".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout(_)));
    }
}

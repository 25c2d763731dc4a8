//! Owned handle around the spawned agent CLI process.

use std::process::ExitStatus;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdout, Command};

use crate::errors::GatewayError;

/// One in-flight agent process, owned by the invocation that spawned it.
///
/// There is no ambient process state anywhere: whoever holds the handle is
/// the only party that can feed, stream, or wait on the child, and dropping
/// the handle kills a child that is still running.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    command: String,
}

impl ProcessHandle {
    /// Spawn `command`, taking ownership of the child. `rendered` is the
    /// human-readable command line used in spawn errors.
    pub fn spawn(command: &mut Command, rendered: &str) -> Result<Self, GatewayError> {
        command.kill_on_drop(true);
        let child = command.spawn().map_err(|source| GatewayError::Spawn {
            command: rendered.to_string(),
            source,
        })?;
        Ok(Self {
            child,
            command: rendered.to_string(),
        })
    }

    /// The command line this handle was spawned with.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// OS process id while the child is running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Write the prompt to the child's stdin and close it so the CLI knows
    /// the input is complete.
    pub async fn feed_stdin(&mut self, text: &str) -> Result<(), GatewayError> {
        if let Some(mut stdin) = self.child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(GatewayError::Stdin)?;
            stdin.shutdown().await.map_err(GatewayError::Stdin)?;
        }
        Ok(())
    }

    /// Take the stdout pipe for streaming. Callable once.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Wait for the child to exit.
    pub async fn wait(&mut self) -> Result<ExitStatus, GatewayError> {
        self.child.wait().await.map_err(GatewayError::Wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn spawn_failure_reports_the_command() {
        let mut command = Command::new("definitely-not-a-real-binary-foreman");
        let err = ProcessHandle::spawn(&mut command, "definitely-not-a-real-binary-foreman")
            .unwrap_err();
        match err {
            GatewayError::Spawn { command, .. } => {
                assert!(command.contains("definitely-not-a-real-binary-foreman"));
            }
            other => panic!("Expected Spawn, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn feeds_stdin_and_streams_stdout() {
        let mut command = Command::new("cat");
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        let mut handle = ProcessHandle::spawn(&mut command, "cat").unwrap();
        handle.feed_stdin("hello\nworld\n").await.unwrap();

        let stdout = handle.take_stdout().unwrap();
        let mut lines = BufReader::new(stdout).lines();
        let mut seen = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            seen.push(line);
        }
        let status = handle.wait().await.unwrap();
        assert!(status.success());
        assert_eq!(seen, vec!["hello".to_string(), "world".to_string()]);
    }
}

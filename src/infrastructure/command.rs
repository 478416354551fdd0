//! External command execution
//!
//! Every interaction with the host and the cluster goes through a shell
//! command. Output from stdout and stderr is interleaved into one ordered
//! line buffer; callers that need structured output must tolerate stray
//! stderr lines.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::CommandError;

/// Exit code and captured output of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub code: i32,
    pub lines: Vec<String>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Captured lines joined back into one string
    pub fn output(&self) -> String {
        self.lines.join("\n")
    }

    /// Turn a tolerated result into a hard failure
    pub fn require_success(self, command: impl Into<String>) -> Result<Self, CommandError> {
        if self.success() {
            Ok(self)
        } else {
            Err(CommandError::Failed {
                command: command.into(),
                code: self.code,
                lines: self.lines,
            })
        }
    }
}

/// How a command is run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Non-zero exit becomes `CommandError::Failed`
    pub fail_on_error: bool,
    /// Don't echo the command and its output
    pub quiet: bool,
}

/// Runs opaque commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, options: RunOptions) -> Result<CommandResult, CommandError>;

    /// Run with echo; fail on non-zero only when asked
    async fn execute(
        &self,
        command: &str,
        fail_on_error: bool,
    ) -> Result<CommandResult, CommandError> {
        self.run(
            command,
            RunOptions {
                fail_on_error,
                quiet: false,
            },
        )
        .await
    }

    /// Silent state query; never fails on exit code
    async fn query(&self, command: &str) -> Result<CommandResult, CommandError> {
        self.run(
            command,
            RunOptions {
                fail_on_error: false,
                quiet: true,
            },
        )
        .await
    }
}

/// Runs commands through `sh -c`
#[derive(Debug, Default, Clone)]
pub struct Shell;

impl Shell {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for Shell {
    async fn run(&self, command: &str, options: RunOptions) -> Result<CommandResult, CommandError> {
        if !options.quiet {
            info!("▶ Running command: {}", command);
        } else {
            debug!("Running query: {}", command);
        }

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        for reader in readers {
            let _ = reader.await;
        }

        let status = child.wait().await.map_err(|source| CommandError::Spawn {
            command: command.to_string(),
            source,
        })?;

        // Killed by a signal
        let code = status.code().unwrap_or(-1);

        if code != 0 && options.fail_on_error {
            error!("❌ Command error ({}): {}", code, command);
            for line in &lines {
                error!("   {}", line);
            }
            return Err(CommandError::Failed {
                command: command.to_string(),
                code,
                lines,
            });
        }

        if !options.quiet {
            for line in &lines {
                info!("   {}", line);
            }
        }

        Ok(CommandResult { code, lines })
    }
}

fn forward_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = normalize_line(&line);
            if line.is_empty() {
                continue;
            }
            if tx.send(line).is_err() {
                break;
            }
        }
    })
}

fn normalize_line(raw: &str) -> String {
    raw.replace(['\r', '\n'], "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let result = Shell::new()
            .execute("echo '  hello  '; echo world 1>&2", true)
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(result.lines.len(), 2);
        assert!(result.lines.contains(&"hello".to_string()));
        assert!(result.lines.contains(&"world".to_string()));
    }

    #[tokio::test]
    async fn test_soft_failure_returns_code() {
        let result = Shell::new()
            .execute("echo partial; exit 3", false)
            .await
            .unwrap();

        assert_eq!(result.code, 3);
        assert_eq!(result.lines, vec!["partial".to_string()]);
    }

    #[tokio::test]
    async fn test_hard_failure_carries_output() {
        let err = Shell::new()
            .execute("echo broken; exit 2", true)
            .await
            .unwrap_err();

        match err {
            CommandError::Failed { code, lines, .. } => {
                assert_eq!(code, 2);
                assert_eq!(lines, vec!["broken".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_query_skips_blank_lines() {
        let result = Shell::new().query("printf 'a\\n\\n  \\nb\\r\\n'").await.unwrap();
        assert_eq!(result.lines, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_require_success() {
        let ok = CommandResult {
            code: 0,
            lines: vec![],
        };
        assert!(ok.require_success("true").is_ok());

        let failed = CommandResult {
            code: 1,
            lines: vec!["nope".to_string()],
        };
        let err = failed.require_success("false").unwrap_err();
        assert_eq!(err.lines(), &["nope".to_string()]);
    }
}

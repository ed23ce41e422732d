//! Executes commands as child processes.

use std::process::Stdio;
use std::time::Duration;

use systek_protocol::{Command, CommandType};

use crate::{CommandExecutor, ExecError, ExecFuture, Execution};

/// Runs CONSOLE commands through the platform shell and POWERSHELL
/// commands through PowerShell. Parameters become environment variables of
/// the child. SQL has no backend here and always fails.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    /// Kill the child if it runs longer than this.
    pub timeout: Option<Duration>,
}

impl ProcessExecutor {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    fn build(&self, command: &Command) -> Result<tokio::process::Command, ExecError> {
        let mut child = match command.command_type {
            CommandType::Console => shell(&command.text),
            CommandType::PowerShell => powershell(&command.text),
            CommandType::Sql => return Err(ExecError::Unsupported(CommandType::Sql)),
        };
        child
            .envs(&command.parameters)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(child)
    }

    async fn run(&self, command: &Command) -> Result<Execution, ExecError> {
        let mut child = self.build(command)?;
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.output())
                .await
                .map_err(|_| ExecError::TimedOut(limit))??,
            None => child.output().await?,
        };

        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        lines.extend(
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::to_string),
        );

        if output.status.success() {
            Ok(Execution::success(lines))
        } else {
            lines.push(format!("exit status: {}", output.status));
            Ok(Execution::failed(lines))
        }
    }
}

impl CommandExecutor for ProcessExecutor {
    fn execute<'a>(&'a self, command: &'a Command) -> ExecFuture<'a> {
        Box::pin(self.run(command))
    }
}

#[cfg(windows)]
fn shell(text: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.args(["/C", text]);
    cmd
}

#[cfg(not(windows))]
fn shell(text: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.args(["-c", text]);
    cmd
}

fn powershell(text: &str) -> tokio::process::Command {
    let program = if cfg!(windows) { "powershell" } else { "pwsh" };
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(["-NoProfile", "-NonInteractive", "-Command", text]);
    cmd
}

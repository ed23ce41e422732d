//! Runs the commands of a [`CommandSet`](systek_protocol::CommandSet).
//!
//! The [`CommandExecutor`] trait is the seam between the dispatcher and
//! whatever actually runs a command; [`ProcessExecutor`] is the default
//! that shells out.

pub mod error;
pub mod process;
pub mod runner;

use std::future::Future;
use std::pin::Pin;

use systek_protocol::{Command, CommandStatus};

pub use error::ExecError;
pub use process::ProcessExecutor;
pub use runner::{SetOutcome, run_command_set};

/// Result of running one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub status: CommandStatus,
    pub output: Vec<String>,
}

impl Execution {
    pub fn success(output: Vec<String>) -> Self {
        Self {
            status: CommandStatus::Success,
            output,
        }
    }

    pub fn failed(output: Vec<String>) -> Self {
        Self {
            status: CommandStatus::Failed,
            output,
        }
    }
}

/// A boxed future returned by [`CommandExecutor::execute`].
pub type ExecFuture<'a> = Pin<Box<dyn Future<Output = Result<Execution, ExecError>> + Send + 'a>>;

/// Runs a single command.
pub trait CommandExecutor: Send + Sync {
    fn execute<'a>(&'a self, command: &'a Command) -> ExecFuture<'a>;
}

use systek_protocol::{CommandSet, CommandStatus};

use crate::CommandExecutor;

/// Aggregate result of running a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Succeeded,
    /// At least one command failed; the rest still ran.
    Failed,
    /// The set was missing commands and nothing ran.
    Incomplete,
}

/// Runs every command of `set` in ascending sequence order, one at a time.
///
/// A failing command is recorded and does not stop the batch. Commands that
/// already carry a final status are not run again.
pub async fn run_command_set(set: &mut CommandSet, executor: &dyn CommandExecutor) -> SetOutcome {
    if !set.is_complete() {
        tracing::warn!(
            set = set.id(),
            missing = set.missing_count(),
            "refusing to run incomplete command set"
        );
        return SetOutcome::Incomplete;
    }

    let set_id = set.id();
    let mut failed = false;
    for command in set.iter_mut() {
        if !command.is_executed() {
            let (status, output) = match executor.execute(command).await {
                Ok(execution) => (execution.status, execution.output),
                Err(e) => (CommandStatus::Failed, vec![e.to_string()]),
            };
            command.append_output(output);
            // NotExecuted from an executor counts as a failure.
            if !command.finish(status) {
                command.mark_failed();
            }
            tracing::debug!(
                set = set_id,
                sequence = command.sequence(),
                status = ?command.status(),
                "command finished"
            );
        }
        failed |= command.status() != CommandStatus::Success;
    }

    if failed {
        SetOutcome::Failed
    } else {
        SetOutcome::Succeeded
    }
}

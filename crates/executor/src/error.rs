use systek_protocol::CommandType;

/// Errors that prevent a command from running at all.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to start process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("no {0} backend configured")]
    Unsupported(CommandType),

    #[error("command timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

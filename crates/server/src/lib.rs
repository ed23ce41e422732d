//! Server side of Systek.
//!
//! The [`MachineListener`] accepts agent sockets. Each one becomes a
//! [`Machine`] whose messages are handled by a [`ServerDispatcher`]. Live
//! machines are kept in the [`MachineRegistry`], which prunes dead ones.

pub mod auth;
pub mod context;
pub mod dispatcher;
pub mod listener;
pub mod machine;
pub mod registry;
pub mod store;

pub use auth::Authenticator;
pub use context::ServerContext;
pub use dispatcher::ServerDispatcher;
pub use listener::{ListenerConfig, MachineListener};
pub use machine::{FailureReport, Machine, MachineId, MachineState};
pub use registry::MachineRegistry;
pub use store::{MachineStore, MemoryMachineStore};

use systek_net::NetError;

/// Errors from the server side.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Net(#[from] NetError),

    #[error("machine {0} is not authenticated")]
    NotAuthenticated(MachineId),

    #[error("machine store error: {0}")]
    Store(String),
}

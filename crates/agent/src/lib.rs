//! Agent side of Systek.
//!
//! [`Supervisor`] keeps one connection to the server alive and feeds its
//! messages to an [`AgentDispatcher`], which answers state requests and
//! runs command sets.

pub mod dispatcher;
pub mod supervisor;
pub mod throttle;

pub use dispatcher::{AgentDispatcher, AgentState};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorState};
pub use throttle::ErrorThrottle;

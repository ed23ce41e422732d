//! Connection layer shared by the Systek server and agent.
//!
//! A [`Connection`] owns one TCP socket, runs a receive task that decodes
//! frames, resolves replies to synchronized sends, and publishes every
//! other message as a [`ConnectionEvent`] for the owner's event pump.

pub mod connection;
pub mod error;
pub mod events;
pub mod frame;
pub mod handler;
pub mod link;

pub use connection::{Connection, ConnectionConfig};
pub use error::NetError;
pub use events::{ConnectionEvent, LogEvent, LogRecord, LogSink, MemorySink, TracingSink};
pub use handler::{HandlerFuture, MessageHandler, run_event_pump, send_reply};
pub use link::{Link, LinkFuture};

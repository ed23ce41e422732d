//! Wire protocol for Systek server-agent communication.
//!
//! A frame is a 4-byte little-endian signed length followed by a JSON
//! encoded [`WireMessage`]. Every payload carries the protocol version in
//! its `v` field so peers can refuse frames they do not understand.

pub mod codec;
pub mod command;
pub mod constants;
pub mod message;
pub mod update;

pub use codec::CodecError;
pub use command::{Command, CommandSet, CommandSetError, CommandStatus, CommandType};
pub use constants::{AreaType, LogLevel, MessageType};
pub use message::{SyncTag, WireMessage};
pub use update::{ServiceState, UpdateData};

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Version written into every payload's `v` field.
pub const PROTOCOL_VERSION: u16 = 1;

/// Size of the length prefix in front of every payload.
pub const HEADER_SIZE: usize = 4;

/// Maximum payload size in bytes.
pub const MAX_FRAME_SIZE: usize = 65_535;

/// Largest `targetCount` a decoded command set may declare.
///
/// The smallest encodable command takes more than 48 bytes, so no frame can
/// carry more commands than this.
pub const MAX_COMMANDS_PER_SET: u32 = (MAX_FRAME_SIZE / 48) as u32;

/// Default port the server listens on.
pub const DEFAULT_PORT: u16 = 65_000;

/// Default wait for a reply to a synchronized send.
pub const SYNC_TIMEOUT: Duration = Duration::from_millis(5000);

/// Per-read deadline once the first byte of a frame has arrived.
///
/// Idle connections have no deadline; only a peer that stalls in the
/// middle of a frame trips this.
pub const FRAME_READ_TIMEOUT: Duration = Duration::from_millis(5000);

/// Pause between agent connection checks.
pub const RECONNECT_INTERVAL: Duration = Duration::from_millis(5000);

/// Pause between server registry prune passes.
pub const PRUNE_INTERVAL: Duration = Duration::from_millis(5000);

/// Bound on a single outbound connect attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Minimum spacing between repeated connection error logs.
pub const ERROR_THROTTLE_WINDOW: Duration = Duration::from_secs(60);

/// Message type identifier.
///
/// Closed set: a payload naming anything else is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Command,
    Close,
    Log,
    Fail,
    Success,
    Ack,
    Timeout,
    UpdateBasic,
    UpdateServices,
}

impl MessageType {
    /// Stable numeric code of this type.
    pub fn code(self) -> i32 {
        match self {
            Self::Command => 1,
            Self::Close => 2,
            Self::Log => 3,
            Self::Fail => 4,
            Self::Success => 5,
            Self::Ack => 6,
            Self::Timeout => 7,
            Self::UpdateBasic => 8,
            Self::UpdateServices => 9,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => Self::Command,
            2 => Self::Close,
            3 => Self::Log,
            4 => Self::Fail,
            5 => Self::Success,
            6 => Self::Ack,
            7 => Self::Timeout,
            8 => Self::UpdateBasic,
            9 => Self::UpdateServices,
            _ => return None,
        })
    }

    /// Returns `true` for types that never receive a reply.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ack | Self::Close | Self::Timeout)
    }
}

/// Severity carried by LOG messages and log sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Error = 1,
    Warning = 2,
    Info = 3,
    Debug = 4,
}

impl LogLevel {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Unknown codes map to [`LogLevel::Info`].
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Error,
            2 => Self::Warning,
            4 => Self::Debug,
            _ => Self::Info,
        }
    }
}

/// Subsystem that produced a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AreaType {
    ServerInitialization = 1000,
    ServerTcpListener = 1001,
    ServerMachine = 1002,
    ServerMessageHandler = 1003,
    AgentMessageHandler = 2000,
    AgentInitialization = 2001,
    NetLib = 3000,
    UnitTest = 4000,
}

impl AreaType {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1000 => Self::ServerInitialization,
            1001 => Self::ServerTcpListener,
            1002 => Self::ServerMachine,
            1003 => Self::ServerMessageHandler,
            2000 => Self::AgentMessageHandler,
            2001 => Self::AgentInitialization,
            3000 => Self::NetLib,
            4000 => Self::UnitTest,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&MessageType::UpdateBasic).unwrap(),
            "\"UPDATE_BASIC\""
        );
        let parsed: MessageType = serde_json::from_str("\"UPDATE_SERVICES\"").unwrap();
        assert_eq!(parsed, MessageType::UpdateServices);
        assert!(serde_json::from_str::<MessageType>("\"PING\"").is_err());
    }

    #[test]
    fn message_type_codes_are_stable() {
        for code in 1..=9 {
            let ty = MessageType::from_code(code).unwrap();
            assert_eq!(ty.code(), code);
        }
        assert_eq!(MessageType::Command.code(), 1);
        assert_eq!(MessageType::UpdateServices.code(), 9);
        assert!(MessageType::from_code(0).is_none());
        assert!(MessageType::from_code(10).is_none());
    }

    #[test]
    fn terminal_types() {
        assert!(MessageType::Ack.is_terminal());
        assert!(MessageType::Close.is_terminal());
        assert!(MessageType::Timeout.is_terminal());
        assert!(!MessageType::Command.is_terminal());
        assert!(!MessageType::Fail.is_terminal());
    }

    #[test]
    fn area_codes() {
        assert_eq!(AreaType::NetLib.code(), 3000);
        assert_eq!(AreaType::from_code(1003), Some(AreaType::ServerMessageHandler));
        assert_eq!(AreaType::from_code(5), None);
    }

    #[test]
    fn unknown_log_level_is_info() {
        assert_eq!(LogLevel::from_code(1), LogLevel::Error);
        assert_eq!(LogLevel::from_code(42), LogLevel::Info);
        assert!(LogLevel::Error < LogLevel::Debug);
    }
}

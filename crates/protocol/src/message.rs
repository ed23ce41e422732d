use serde::{Deserialize, Serialize};

use crate::command::CommandSet;
use crate::constants::{AreaType, LogLevel, MessageType, PROTOCOL_VERSION};
use crate::update::UpdateData;

/// Correlation tag of a synchronized exchange.
///
/// The request carries `reply == false`; the peer echoes the same `id`
/// with `reply == true` so the sender's pending slot can be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncTag {
    pub id: u64,
    pub reply: bool,
}

/// Envelope for everything exchanged between server and agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(rename = "v")]
    pub version: u16,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_set: Option<CommandSet>,
    #[serde(default)]
    pub command_set_id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncTag>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log_lines: Vec<String>,
    #[serde(default)]
    pub log_type: i32,
    #[serde(default)]
    pub area_type: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdateData>,
}

impl WireMessage {
    /// Creates an empty message of the given type.
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            msg_type,
            command_set: None,
            command_set_id: 0,
            sync: None,
            log_lines: Vec::new(),
            log_type: 0,
            area_type: 0,
            update: None,
        }
    }

    pub fn command(set: CommandSet) -> Self {
        let mut msg = Self::new(MessageType::Command);
        msg.command_set_id = set.id();
        msg.command_set = Some(set);
        msg
    }

    /// A LOG record holding a single line.
    pub fn log(level: LogLevel, area: AreaType, line: impl Into<String>) -> Self {
        let mut msg = Self::new(MessageType::Log);
        msg.log_type = level.code();
        msg.area_type = area.code();
        msg.log_lines.push(line.into());
        msg
    }

    /// A FAIL report describing why a request could not be honored.
    pub fn fail(reason: impl Into<String>) -> Self {
        let mut msg = Self::new(MessageType::Fail);
        msg.log_lines.push(reason.into());
        msg
    }

    pub fn close() -> Self {
        Self::new(MessageType::Close)
    }

    pub fn ack() -> Self {
        Self::new(MessageType::Ack)
    }

    /// Asks the peer for its hostname, auth key and services.
    pub fn update_basic_request() -> Self {
        Self::new(MessageType::UpdateBasic)
    }

    pub fn update_basic(update: UpdateData) -> Self {
        let mut msg = Self::new(MessageType::UpdateBasic);
        msg.update = Some(update);
        msg
    }

    pub fn update_services(update: UpdateData) -> Self {
        let mut msg = Self::new(MessageType::UpdateServices);
        msg.update = Some(update);
        msg
    }

    /// Synthetic outcome of a synchronized send that got no reply in time.
    pub fn timeout(sync_id: u64) -> Self {
        let mut msg = Self::new(MessageType::Timeout);
        msg.sync = Some(SyncTag {
            id: sync_id,
            reply: true,
        });
        msg
    }

    /// Builds the reply to this message.
    ///
    /// The reply echoes the command set id and, for a synchronized request,
    /// its sync id marked as a reply.
    pub fn reply(&self, msg_type: MessageType) -> Self {
        let mut msg = Self::new(msg_type);
        msg.command_set_id = self.command_set_id;
        msg.sync = self.sync.map(|tag| SyncTag {
            id: tag.id,
            reply: true,
        });
        msg
    }

    /// Tags this message as the request half of a synchronized exchange.
    pub fn with_sync(mut self, id: u64) -> Self {
        self.sync = Some(SyncTag { id, reply: false });
        self
    }

    pub fn sync_id(&self) -> Option<u64> {
        self.sync.map(|tag| tag.id)
    }

    pub fn is_reply(&self) -> bool {
        self.sync.is_some_and(|tag| tag.reply)
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_code(self.log_type)
    }

    pub fn area(&self) -> Option<AreaType> {
        AreaType::from_code(self.area_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandType};

    #[test]
    fn reply_echoes_sync_and_set_id() {
        let mut set = CommandSet::new(12, 1);
        set.add_command(Command::new(12, 1, CommandType::Console, "uptime"))
            .unwrap();
        let request = WireMessage::command(set).with_sync(44);
        assert!(!request.is_reply());

        let reply = request.reply(MessageType::Success);
        assert_eq!(reply.msg_type, MessageType::Success);
        assert_eq!(reply.command_set_id, 12);
        assert_eq!(reply.sync, Some(SyncTag { id: 44, reply: true }));
        assert!(reply.command_set.is_none());
    }

    #[test]
    fn reply_to_unsynchronized_message_has_no_tag() {
        let reply = WireMessage::ack().reply(MessageType::Ack);
        assert!(reply.sync.is_none());
        assert!(!reply.is_reply());
    }

    #[test]
    fn log_message_carries_codes() {
        let msg = WireMessage::log(LogLevel::Warning, AreaType::AgentMessageHandler, "disk low");
        assert_eq!(msg.log_type, 2);
        assert_eq!(msg.area_type, 2000);
        assert_eq!(msg.log_level(), LogLevel::Warning);
        assert_eq!(msg.area(), Some(AreaType::AgentMessageHandler));
        assert_eq!(msg.log_lines, vec!["disk low"]);
    }

    #[test]
    fn json_shape() {
        let msg = WireMessage::timeout(3);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["v"], 1);
        assert_eq!(value["type"], "TIMEOUT");
        assert_eq!(value["sync"]["id"], 3);
        assert_eq!(value["sync"]["reply"], true);
        assert!(value.get("commandSet").is_none());
        assert!(value.get("logLines").is_none());
    }
}

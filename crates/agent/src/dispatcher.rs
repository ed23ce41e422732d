//! Agent-side handling of messages from the server.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use systek_executor::{CommandExecutor, SetOutcome, run_command_set};
use systek_net::{HandlerFuture, Link, LogSink, MessageHandler, send_reply};
use systek_protocol::{AreaType, LogLevel, MessageType, ServiceState, UpdateData, WireMessage};

/// What this agent reports about its machine.
#[derive(Debug)]
pub struct AgentState {
    hostname: String,
    auth_key: String,
    services: RwLock<BTreeMap<String, i32>>,
}

impl AgentState {
    pub fn new(hostname: impl Into<String>, auth_key: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            auth_key: auth_key.into(),
            services: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub async fn set_service(&self, name: impl Into<String>, state: ServiceState) {
        self.services.write().await.insert(name.into(), state.code());
    }

    pub async fn replace_services(&self, services: BTreeMap<String, i32>) {
        *self.services.write().await = services;
    }

    /// Hostname, auth key and services.
    pub async fn snapshot(&self) -> UpdateData {
        UpdateData {
            hostname: self.hostname.clone(),
            auth_key: self.auth_key.clone(),
            services: self.services.read().await.clone(),
        }
    }

    /// Hostname and services, without the auth key.
    pub async fn services_snapshot(&self) -> UpdateData {
        UpdateData {
            hostname: self.hostname.clone(),
            auth_key: String::new(),
            services: self.services.read().await.clone(),
        }
    }
}

/// Reacts to messages from the server.
///
/// Every request except ACK, CLOSE and TIMEOUT gets exactly one reply,
/// ACK unless the handler picks something else.
pub struct AgentDispatcher {
    state: Arc<AgentState>,
    executor: Arc<dyn CommandExecutor>,
    sink: Arc<dyn LogSink>,
}

impl AgentDispatcher {
    pub fn new(
        state: Arc<AgentState>,
        executor: Arc<dyn CommandExecutor>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            state,
            executor,
            sink,
        }
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.sink
            .write(level, AreaType::AgentMessageHandler, None, message);
    }

    async fn dispatch(&self, link: &dyn Link, msg: WireMessage) {
        if msg.is_reply() {
            // A reply whose sender stopped waiting for it.
            self.log(
                LogLevel::Debug,
                &format!("dropping late {:?} reply", msg.msg_type),
            );
            return;
        }

        let reply = match msg.msg_type {
            MessageType::Ack | MessageType::Timeout => return,
            MessageType::Close => {
                if link.is_connected() {
                    let _ = link.send(msg.reply(MessageType::Ack)).await;
                }
                link.close().await;
                self.log(LogLevel::Info, "server closed the session");
                return;
            }
            MessageType::UpdateBasic => {
                let mut reply = msg.reply(MessageType::UpdateBasic);
                reply.update = Some(self.state.snapshot().await);
                reply
            }
            MessageType::UpdateServices => {
                let mut reply = msg.reply(MessageType::UpdateServices);
                reply.update = Some(self.state.services_snapshot().await);
                reply
            }
            MessageType::Command => self.run_commands(msg).await,
            MessageType::Log => {
                let level = msg.log_level();
                let area = msg.area().unwrap_or(AreaType::AgentMessageHandler);
                for line in &msg.log_lines {
                    self.sink.write(level, area, None, line);
                }
                msg.reply(MessageType::Ack)
            }
            MessageType::Fail => {
                self.log(
                    LogLevel::Warning,
                    &format!("server reported failure: {}", msg.log_lines.join("; ")),
                );
                msg.reply(MessageType::Ack)
            }
            MessageType::Success => msg.reply(MessageType::Ack),
        };

        if let Err(e) = send_reply(link, reply).await {
            self.log(LogLevel::Warning, &format!("failed to send reply: {e}"));
        }
    }

    async fn run_commands(&self, mut msg: WireMessage) -> WireMessage {
        let Some(mut set) = msg.command_set.take() else {
            let mut reply = msg.reply(MessageType::Fail);
            reply.log_lines.push("COMMAND without a command set".to_string());
            return reply;
        };

        let outcome = run_command_set(&mut set, self.executor.as_ref()).await;
        let mut reply = match outcome {
            SetOutcome::Succeeded => msg.reply(MessageType::Success),
            SetOutcome::Failed => msg.reply(MessageType::Fail),
            SetOutcome::Incomplete => {
                let mut reply = msg.reply(MessageType::Fail);
                reply.log_lines.push(set.missing_summary());
                reply
            }
        };
        if outcome != SetOutcome::Succeeded {
            self.log(
                LogLevel::Warning,
                &format!("command set {} finished with {outcome:?}", set.id()),
            );
        }
        reply.command_set = Some(set);
        reply
    }
}

impl MessageHandler for AgentDispatcher {
    fn handle<'a>(&'a self, link: &'a dyn Link, msg: WireMessage) -> HandlerFuture<'a> {
        Box::pin(self.dispatch(link, msg))
    }
}

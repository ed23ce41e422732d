//! Server-side handling of messages from an agent.
//!
//! UPDATE_BASIC is always processed since it is how a machine becomes
//! authenticated. Every other type is processed only once the machine is
//! authenticated, though the default reply still goes out either way.

use std::sync::Arc;

use systek_executor::{CommandExecutor, SetOutcome, run_command_set};
use systek_net::{HandlerFuture, Link, LogSink, MessageHandler, send_reply};
use systek_protocol::{AreaType, LogLevel, MessageType, WireMessage};

use crate::auth::Authenticator;
use crate::machine::{MachineId, MachineState};

/// Message handler bound to one machine.
pub struct ServerDispatcher {
    machine_id: MachineId,
    state: Arc<MachineState>,
    auth: Arc<Authenticator>,
    executor: Arc<dyn CommandExecutor>,
    sink: Arc<dyn LogSink>,
    verbose: bool,
}

impl ServerDispatcher {
    pub fn new(
        machine_id: MachineId,
        state: Arc<MachineState>,
        auth: Arc<Authenticator>,
        executor: Arc<dyn CommandExecutor>,
        sink: Arc<dyn LogSink>,
        verbose: bool,
    ) -> Self {
        Self {
            machine_id,
            state,
            auth,
            executor,
            sink,
            verbose,
        }
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.sink.write(
            level,
            AreaType::ServerMessageHandler,
            Some(self.machine_id),
            message,
        );
    }

    async fn dispatch(&self, link: &dyn Link, mut msg: WireMessage) {
        if self.verbose {
            self.log(
                LogLevel::Debug,
                &format!("handling {:?} from machine {}", msg.msg_type, self.machine_id),
            );
        }
        if msg.is_reply() {
            self.log(
                LogLevel::Debug,
                &format!("dropping late {:?} reply", msg.msg_type),
            );
            return;
        }

        let authenticated = self.state.is_authenticated();
        let mut reply = msg.reply(MessageType::Ack);

        match msg.msg_type {
            MessageType::Ack | MessageType::Timeout => return,
            MessageType::Close => {
                if authenticated && link.is_connected() {
                    let _ = link.send(reply).await;
                }
                link.close().await;
                self.log(LogLevel::Info, "agent closed the connection");
                return;
            }
            MessageType::UpdateBasic => {
                if let Some(update) = msg.update.as_ref() {
                    self.state.record_basic(update).await;
                    if self.state.authenticate(&self.auth).await && !authenticated {
                        self.log(
                            LogLevel::Info,
                            &format!("{} authenticated", update.hostname),
                        );
                    }
                }
            }
            _ if !authenticated => {}
            MessageType::UpdateServices => {
                if let Some(update) = msg.update.take() {
                    self.state.replace_services(update.services).await;
                }
            }
            MessageType::Command => {
                reply = self.run_commands(&mut msg).await;
            }
            MessageType::Log => {
                if msg.log_lines.len() == 1 {
                    let area = msg.area().unwrap_or(AreaType::ServerMessageHandler);
                    self.sink.write(
                        msg.log_level(),
                        area,
                        Some(self.machine_id),
                        &msg.log_lines[0],
                    );
                } else {
                    reply = msg.reply(MessageType::Fail);
                    reply.log_lines.push(format!(
                        "LOG must carry exactly one line, got {}",
                        msg.log_lines.len()
                    ));
                }
            }
            MessageType::Fail => {
                self.state
                    .record_failure(msg.command_set_id, std::mem::take(&mut msg.log_lines))
                    .await;
                self.log(LogLevel::Warning, "agent reported a failure");
            }
            MessageType::Success => {
                self.log(
                    LogLevel::Info,
                    &format!("agent reported success for set {}", msg.command_set_id),
                );
            }
        }

        if let Err(e) = send_reply(link, reply).await {
            self.log(LogLevel::Warning, &format!("failed to send reply: {e}"));
        }
    }

    async fn run_commands(&self, msg: &mut WireMessage) -> WireMessage {
        let Some(mut set) = msg.command_set.take() else {
            let mut reply = msg.reply(MessageType::Fail);
            reply.log_lines.push("COMMAND without a command set".to_string());
            return reply;
        };
        let outcome = run_command_set(&mut set, self.executor.as_ref()).await;
        let mut reply = match outcome {
            SetOutcome::Succeeded => msg.reply(MessageType::Success),
            SetOutcome::Failed | SetOutcome::Incomplete => msg.reply(MessageType::Fail),
        };
        if outcome == SetOutcome::Incomplete {
            reply.log_lines.push(set.missing_summary());
        }
        reply.command_set = Some(set);
        reply
    }
}

impl MessageHandler for ServerDispatcher {
    fn handle<'a>(&'a self, link: &'a dyn Link, msg: WireMessage) -> HandlerFuture<'a> {
        Box::pin(self.dispatch(link, msg))
    }
}

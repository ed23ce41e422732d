//! A connected agent as seen by the server.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use systek_net::{Link, LogSink};
use systek_protocol::{AreaType, CommandSet, LogLevel, MessageType, UpdateData, WireMessage};

use crate::ServerError;
use crate::auth::Authenticator;

pub type MachineId = u64;

/// A FAIL reported by an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub at: DateTime<Utc>,
    pub command_set_id: i32,
    pub lines: Vec<String>,
}

/// Hostname and key from the same UPDATE_BASIC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Credentials {
    hostname: String,
    auth_key: String,
}

/// Mutable state of a machine, shared with its dispatcher.
#[derive(Debug, Default)]
pub struct MachineState {
    authenticated: AtomicBool,
    credentials: RwLock<Credentials>,
    services: RwLock<BTreeMap<String, i32>>,
    failures: RwLock<Vec<FailureReport>>,
}

impl MachineState {
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub(crate) fn set_authenticated(&self, value: bool) {
        self.authenticated.store(value, Ordering::SeqCst);
    }

    pub async fn hostname(&self) -> String {
        self.credentials.read().await.hostname.clone()
    }

    pub async fn services(&self) -> BTreeMap<String, i32> {
        self.services.read().await.clone()
    }

    pub async fn failures(&self) -> Vec<FailureReport> {
        self.failures.read().await.clone()
    }

    /// Records hostname, auth key and, if present, services.
    pub(crate) async fn record_basic(&self, update: &UpdateData) {
        *self.credentials.write().await = Credentials {
            hostname: update.hostname.clone(),
            auth_key: update.auth_key.clone(),
        };
        if !update.services.is_empty() {
            *self.services.write().await = update.services.clone();
        }
    }

    pub(crate) async fn replace_services(&self, services: BTreeMap<String, i32>) {
        *self.services.write().await = services;
    }

    pub(crate) async fn record_failure(&self, command_set_id: i32, lines: Vec<String>) {
        self.failures.write().await.push(FailureReport {
            at: Utc::now(),
            command_set_id,
            lines,
        });
    }

    #[cfg(test)]
    async fn credentials(&self) -> Credentials {
        self.credentials.read().await.clone()
    }

    /// Checks the recorded credentials and updates the flag.
    ///
    /// The flag is set while the credentials are read-locked, so it always
    /// reflects one recorded pair.
    pub(crate) async fn authenticate(&self, auth: &Authenticator) -> bool {
        let credentials = self.credentials.read().await;
        let ok = auth.verify(&credentials.hostname, &credentials.auth_key);
        self.set_authenticated(ok);
        ok
    }
}

/// One agent connection plus what the server knows about it.
pub struct Machine {
    id: MachineId,
    link: Arc<dyn Link>,
    state: Arc<MachineState>,
    auth: Arc<Authenticator>,
    sink: Arc<dyn LogSink>,
    sync_timeout: Duration,
}

impl Machine {
    pub fn new(
        id: MachineId,
        link: Arc<dyn Link>,
        auth: Arc<Authenticator>,
        sink: Arc<dyn LogSink>,
        sync_timeout: Duration,
    ) -> Self {
        Self {
            id,
            link,
            state: Arc::new(MachineState::default()),
            auth,
            sink,
            sync_timeout,
        }
    }

    pub fn id(&self) -> MachineId {
        self.id
    }

    pub fn link(&self) -> &Arc<dyn Link> {
        &self.link
    }

    pub fn state(&self) -> &Arc<MachineState> {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.sink
            .write(level, AreaType::ServerMachine, Some(self.id), message);
    }

    /// Asks the agent for its hostname and auth key, then authenticates.
    pub async fn handshake(&self) -> bool {
        if let Err(e) = self.basic_update().await {
            self.log(LogLevel::Warning, &format!("basic update failed: {e}"));
        }
        self.authenticate().await
    }

    /// Requests UPDATE_BASIC and records the answer.
    ///
    /// Returns `Ok(false)` when the agent timed out or answered with
    /// something else.
    pub async fn basic_update(&self) -> Result<bool, ServerError> {
        if !self.link.is_connected() {
            return Ok(false);
        }
        let reply = self
            .link
            .send_sync(WireMessage::update_basic_request(), self.sync_timeout)
            .await?;

        match (reply.msg_type, reply.update.as_ref()) {
            (MessageType::UpdateBasic, Some(update)) => {
                self.state.record_basic(update).await;
                Ok(true)
            }
            (MessageType::Timeout, _) => {
                self.log(LogLevel::Info, "reply to UPDATE_BASIC request timed out");
                Ok(false)
            }
            (other, _) => {
                self.log(
                    LogLevel::Warning,
                    &format!("unexpected {other:?} reply to UPDATE_BASIC"),
                );
                Ok(false)
            }
        }
    }

    /// Compares the recorded auth key with the expected one.
    pub async fn authenticate(&self) -> bool {
        let ok = self.state.authenticate(&self.auth).await;
        let hostname = self.state.hostname().await;
        if ok {
            self.log(LogLevel::Info, &format!("{hostname} authenticated"));
        } else {
            self.log(
                LogLevel::Warning,
                &format!("authentication failed for '{hostname}'"),
            );
        }
        ok
    }

    /// Sends a command set and waits for the agent's result.
    ///
    /// The reply is SUCCESS or FAIL carrying the executed set, or TIMEOUT.
    /// A FAIL reply is also kept in the machine's failure history.
    pub async fn send_command_set(&self, set: CommandSet) -> Result<WireMessage, ServerError> {
        if !self.is_authenticated() {
            return Err(ServerError::NotAuthenticated(self.id));
        }
        let set_id = set.id();
        let reply = self
            .link
            .send_sync(WireMessage::command(set), self.sync_timeout)
            .await?;

        match reply.msg_type {
            MessageType::Fail => {
                self.state
                    .record_failure(set_id, reply.log_lines.clone())
                    .await;
                self.log(LogLevel::Warning, &format!("command set {set_id} failed"));
            }
            MessageType::Timeout => {
                self.log(
                    LogLevel::Warning,
                    &format!("command set {set_id} timed out"),
                );
            }
            _ => {}
        }
        Ok(reply)
    }

    /// Requests the agent's services and stores them.
    pub async fn refresh_services(&self) -> Result<bool, ServerError> {
        let reply = self
            .link
            .send_sync(
                WireMessage::new(MessageType::UpdateServices),
                self.sync_timeout,
            )
            .await?;
        match (reply.msg_type, reply.update) {
            (MessageType::UpdateServices, Some(update)) => {
                self.state.replace_services(update.services).await;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Tells the agent the session is over and closes the connection.
    pub async fn close(&self) {
        if self.link.is_connected() {
            let _ = self.link.send(WireMessage::close()).await;
        }
        self.link.close().await;
    }
}

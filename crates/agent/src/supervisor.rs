//! Keeps the agent's connection to the server alive.
//!
//! The loop checks the connection every `reconnect_interval`. When it is
//! missing or dead, a fresh [`Connection`] is built and its events are
//! pumped into the handler. Repeated failures are logged at most once per
//! `error_throttle` window.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use systek_net::{Connection, ConnectionConfig, Link, LogSink, MessageHandler, run_event_pump};
use systek_protocol::constants::{CONNECT_TIMEOUT, ERROR_THROTTLE_WINDOW, RECONNECT_INTERVAL};
use systek_protocol::{AreaType, LogLevel};

use crate::throttle::ErrorThrottle;

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// `host:port` of the server.
    pub server_addr: String,
    pub connection: ConnectionConfig,
    pub reconnect_interval: Duration,
    pub connect_timeout: Duration,
    pub error_throttle: Duration,
}

impl SupervisorConfig {
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            connection: ConnectionConfig::default(),
            reconnect_interval: RECONNECT_INTERVAL,
            connect_timeout: CONNECT_TIMEOUT,
            error_throttle: ERROR_THROTTLE_WINDOW,
        }
    }
}

/// Whether the supervised connection is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connected,
}

/// Reconnect loop for a single remote endpoint.
pub struct Supervisor {
    config: SupervisorConfig,
    handler: Arc<dyn MessageHandler>,
    sink: Arc<dyn LogSink>,
    connection: Mutex<Option<Arc<Connection>>>,
    throttle: std::sync::Mutex<ErrorThrottle>,
    attempts: AtomicU64,
    failures: AtomicU64,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        handler: Arc<dyn MessageHandler>,
        sink: Arc<dyn LogSink>,
    ) -> Arc<Self> {
        let throttle = ErrorThrottle::new(config.error_throttle);
        Arc::new(Self {
            config,
            handler,
            sink,
            connection: Mutex::new(None),
            throttle: std::sync::Mutex::new(throttle),
            attempts: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        })
    }

    /// Runs until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) {
        tracing::info!(server = %self.config.server_addr, "supervisor started");

        while !self.cancel.is_cancelled() {
            if self.state().await == SupervisorState::Disconnected {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = self.try_connect() => {}
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_interval) => {}
            }
        }

        self.close_active().await;
        tracing::info!("supervisor stopped");
    }

    /// Stops the loop, interrupting its sleep, and closes the connection.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.close_active().await;
    }

    pub async fn state(&self) -> SupervisorState {
        match self.connection.lock().await.as_ref() {
            Some(conn) if conn.is_connected() => SupervisorState::Connected,
            _ => SupervisorState::Disconnected,
        }
    }

    /// The live connection, if any.
    pub async fn connection(&self) -> Option<Arc<Connection>> {
        self.connection
            .lock()
            .await
            .as_ref()
            .filter(|conn| conn.is_connected())
            .cloned()
    }

    /// Connection attempts made so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Failed attempts so far.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    async fn try_connect(&self) {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let addr = &self.config.server_addr;
        tracing::debug!(server = %addr, attempt, "connecting");

        if let Some(stale) = self.connection.lock().await.take() {
            stale.close().await;
        }

        let (conn, events) = match Connection::connect(
            addr.as_str(),
            self.config.connection.clone(),
            self.config.connect_timeout,
        )
        .await
        {
            Ok(pair) => pair,
            Err(e) => {
                self.report_failure(&format!("failed to connect to {addr}: {e}"));
                return;
            }
        };

        if let Err(e) = conn.initialize().await {
            self.report_failure(&format!("failed to initialize connection to {addr}: {e}"));
            return;
        }

        let conn = Arc::new(conn);
        let link: Arc<dyn Link> = conn.clone();
        tokio::spawn(run_event_pump(
            events,
            link,
            self.handler.clone(),
            self.sink.clone(),
            None,
        ));
        *self.connection.lock().await = Some(conn);

        if let Ok(mut throttle) = self.throttle.lock() {
            throttle.reset();
        }
        self.sink.write(
            LogLevel::Info,
            AreaType::AgentInitialization,
            None,
            &format!("connected to {addr}"),
        );
    }

    fn report_failure(&self, message: &str) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        let admitted = self
            .throttle
            .lock()
            .ok()
            .and_then(|mut t| t.admit(tokio::time::Instant::now()));

        match admitted {
            Some(0) => self
                .sink
                .write(LogLevel::Error, AreaType::AgentInitialization, None, message),
            Some(suppressed) => self.sink.write(
                LogLevel::Error,
                AreaType::AgentInitialization,
                None,
                &format!("{message} ({suppressed} similar errors suppressed)"),
            ),
            None => tracing::trace!("{message}"),
        }
    }

    async fn close_active(&self) {
        let active = self.connection.lock().await.take();
        if let Some(conn) = active {
            conn.close().await;
        }
    }
}

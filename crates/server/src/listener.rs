//! Accepts agent connections.
//!
//! Each accepted socket is initialized, wrapped in a [`Machine`], given a
//! [`ServerDispatcher`] pump, registered, and then asked to identify itself.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use systek_net::{Connection, ConnectionConfig, Link, run_event_pump};
use systek_protocol::constants::DEFAULT_PORT;
use systek_protocol::{AreaType, LogLevel};

use crate::ServerError;
use crate::context::ServerContext;
use crate::dispatcher::ServerDispatcher;
use crate::machine::{Machine, MachineId};

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_addr: SocketAddr,
    pub connection: ConnectionConfig,
}

impl ListenerConfig {
    /// Listens on all interfaces (port 0 = OS-assigned).
    pub fn new(port: u16) -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], port).into(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PORT)
    }
}

pub struct MachineListener {
    config: ListenerConfig,
    ctx: Arc<ServerContext>,
    next_id: AtomicU64,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl MachineListener {
    pub fn new(config: ListenerConfig, ctx: Arc<ServerContext>) -> Arc<Self> {
        Arc::new(Self {
            config,
            ctx,
            next_id: AtomicU64::new(1),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the bound address once [`run`](Self::run) is listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Stops accepting; `run` then closes every machine and returns.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Accepts connections until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        self.ctx.sink.write(
            LogLevel::Info,
            AreaType::ServerInitialization,
            None,
            &format!("listening on {local_addr}"),
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("listener shutting down");
                    self.ctx.registry.shutdown().await;
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let listener = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = listener.handle_connection(stream, peer_addr).await {
                                    listener.ctx.sink.write(
                                        LogLevel::Error,
                                        AreaType::ServerTcpListener,
                                        None,
                                        &format!("connection from {peer_addr} failed: {e}"),
                                    );
                                }
                            });
                        }
                        Err(e) => {
                            self.ctx.sink.write(
                                LogLevel::Error,
                                AreaType::ServerTcpListener,
                                None,
                                &format!("accept error: {e}"),
                            );
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<MachineId, ServerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(machine = id, peer = %peer_addr, "agent connected");

        let (conn, events) = Connection::new(stream, self.config.connection.clone());
        conn.initialize().await?;
        let link: Arc<dyn Link> = Arc::new(conn);

        let machine = Arc::new(Machine::new(
            id,
            link.clone(),
            self.ctx.auth.clone(),
            self.ctx.sink.clone(),
            self.config.connection.sync_timeout,
        ));
        let dispatcher = Arc::new(ServerDispatcher::new(
            id,
            machine.state().clone(),
            self.ctx.auth.clone(),
            self.ctx.executor.clone(),
            self.ctx.sink.clone(),
            self.config.connection.verbose,
        ));
        tokio::spawn(run_event_pump(
            events,
            link,
            dispatcher,
            self.ctx.sink.clone(),
            Some(id),
        ));

        self.ctx.registry.add(machine.clone()).await;
        machine.handshake().await;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use systek_executor::ProcessExecutor;
    use systek_net::{ConnectionEvent, MemorySink};
    use systek_protocol::{MessageType, UpdateData};

    use crate::auth::Authenticator;
    use crate::store::MemoryMachineStore;

    async fn start(sink: Arc<MemorySink>) -> (Arc<MachineListener>, SocketAddr) {
        let auth = Authenticator::new("s3cret", Arc::new(MemoryMachineStore::new()));
        let ctx = ServerContext::new(
            auth,
            Arc::new(ProcessExecutor::default()),
            sink,
            Duration::from_millis(50),
        );
        let mut config = ListenerConfig::new(0);
        config.bind_addr = ([127, 0, 0, 1], 0).into();
        config.connection.sync_timeout = Duration::from_secs(2);

        let listener = MachineListener::new(config, ctx);
        let runner = listener.clone();
        tokio::spawn(async move { runner.run().await });

        let addr = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(addr) = listener.local_addr().await {
                    return addr;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        (listener, addr)
    }

    /// Connects and answers the server's UPDATE_BASIC with `key`.
    async fn agent(addr: SocketAddr, key: &str) -> Connection {
        let (conn, mut events) =
            Connection::connect(addr, ConnectionConfig::default(), Duration::from_secs(2))
                .await
                .unwrap();
        conn.initialize().await.unwrap();
        loop {
            match events.recv().await.unwrap() {
                ConnectionEvent::Message(msg) if msg.msg_type == MessageType::UpdateBasic => {
                    let mut reply = msg.reply(MessageType::UpdateBasic);
                    reply.update = Some(UpdateData::new("web01", key));
                    conn.send(reply).await.unwrap();
                    return conn;
                }
                _ => {}
            }
        }
    }

    async fn wait_until<F: Fn() -> bool>(check: F) {
        tokio::time::timeout(Duration::from_secs(3), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn accepted_agent_is_registered_and_authenticated() {
        let sink = Arc::new(MemorySink::new());
        let (listener, addr) = start(sink.clone()).await;
        let _agent = agent(addr, "s3cret").await;

        let registry = listener.context().registry.clone();
        wait_until(|| sink.contains("web01 authenticated")).await;
        let machine = registry.get(1).await.unwrap();
        assert!(machine.is_authenticated());
        assert_eq!(machine.state().hostname().await, "web01");
        listener.shutdown();
    }

    #[tokio::test]
    async fn wrong_key_stays_connected_but_unauthenticated() {
        let sink = Arc::new(MemorySink::new());
        let (listener, addr) = start(sink.clone()).await;
        let agent = agent(addr, "wrong").await;

        wait_until(|| sink.contains("authentication failed")).await;
        let machine = listener.context().registry.get(1).await.unwrap();
        assert!(!machine.is_authenticated());
        assert!(machine.is_connected());
        assert!(agent.is_connected());
        listener.shutdown();
    }

    #[tokio::test]
    async fn disconnected_agent_is_pruned() {
        let sink = Arc::new(MemorySink::new());
        let (listener, addr) = start(sink.clone()).await;
        let agent = agent(addr, "s3cret").await;
        wait_until(|| sink.contains("web01 authenticated")).await;

        agent.close().await;
        wait_until(|| sink.contains("machine pruned")).await;
        assert!(listener.context().registry.is_empty().await);
        listener.shutdown();
    }

    #[tokio::test]
    async fn shutdown_closes_agents() {
        let sink = Arc::new(MemorySink::new());
        let (listener, addr) = start(sink.clone()).await;
        let (conn, mut events) =
            Connection::connect(addr, ConnectionConfig::default(), Duration::from_secs(2))
                .await
                .unwrap();
        conn.initialize().await.unwrap();
        wait_until(|| sink.contains("machine registered")).await;

        listener.shutdown();
        let mut got_close = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(3), events.recv()).await
        {
            if let ConnectionEvent::Message(msg) = event
                && msg.msg_type == MessageType::Close
            {
                got_close = true;
            }
        }
        assert!(got_close);
    }
}

//! A framed TCP connection with a dedicated receive task.
//!
//! Writes go through a single async mutex so frames from concurrent senders
//! never interleave. Synchronized sends register a oneshot slot keyed by
//! sync id; the receive task resolves the slot instead of publishing the
//! reply as an event.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use systek_protocol::codec::encode_frame;
use systek_protocol::constants::{FRAME_READ_TIMEOUT, SYNC_TIMEOUT};
use systek_protocol::{AreaType, LogLevel, WireMessage};

use crate::error::NetError;
use crate::events::{ConnectionEvent, LogEvent};
use crate::frame::read_frame;

/// Tunables for a single connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Default wait used by callers that do not pick their own.
    pub sync_timeout: Duration,
    /// Per-read deadline once a frame has started, also bounds each write.
    pub frame_timeout: Duration,
    /// Log every frame sent and received.
    pub verbose: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            sync_timeout: SYNC_TIMEOUT,
            frame_timeout: FRAME_READ_TIMEOUT,
            verbose: false,
        }
    }
}

type PendingMap = HashMap<u64, oneshot::Sender<WireMessage>>;

struct Shared {
    config: ConnectionConfig,
    writer: Mutex<Option<OwnedWriteHalf>>,
    pending: Mutex<PendingMap>,
    events: std::sync::Mutex<Option<mpsc::UnboundedSender<ConnectionEvent>>>,
    connected: AtomicBool,
    initialized: AtomicBool,
    closed: AtomicBool,
    next_sync_id: AtomicU64,
    cancel: CancellationToken,
}

impl Shared {
    fn emit(&self, event: ConnectionEvent) {
        if let Ok(guard) = self.events.lock()
            && let Some(tx) = guard.as_ref()
        {
            let _ = tx.send(event);
        }
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(ConnectionEvent::Log(LogEvent::new(
            level,
            AreaType::NetLib,
            message,
        )));
    }

    /// Closes the connection once; later calls are no-ops.
    ///
    /// With a `failure`, a connection that was live logs it and publishes a
    /// synthetic CLOSE before the event channel is dropped.
    async fn teardown(&self, failure: Option<(LogLevel, String)>) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if was_connected && let Some((level, reason)) = failure {
            self.log(level, reason);
            self.emit(ConnectionEvent::Message(WireMessage::close()));
        }

        self.cancel.cancel();
        // Dropping the senders wakes every waiter in send_sync.
        self.pending.lock().await.clear();

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = tokio::time::timeout(self.config.frame_timeout, writer.shutdown()).await;
        }

        if let Ok(mut events) = self.events.lock() {
            events.take();
        }
    }

    async fn deliver(&self, msg: WireMessage) {
        if let Some(tag) = msg.sync
            && tag.reply
        {
            let slot = self.pending.lock().await.remove(&tag.id);
            if let Some(tx) = slot {
                let _ = tx.send(msg);
                return;
            }
        }

        if self.config.verbose {
            self.log(LogLevel::Debug, format!("received {:?}", msg.msg_type));
        }
        self.emit(ConnectionEvent::Message(msg));
    }
}

/// One peer connection.
///
/// Built around a live socket, started with [`initialize`](Self::initialize)
/// and finished with [`close`](Self::close). A closed connection is never
/// reopened; reconnecting means building a new one.
pub struct Connection {
    inner: Arc<Shared>,
    reader: std::sync::Mutex<Option<OwnedReadHalf>>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
    peer_addr: Option<SocketAddr>,
}

impl Connection {
    /// Wraps an accepted or connected socket.
    ///
    /// Returns the connection and the receiver its events are published on.
    pub fn new(
        stream: TcpStream,
        config: ConnectionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let _ = stream.set_nodelay(true);
        let peer_addr = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Shared {
            config,
            writer: Mutex::new(Some(writer)),
            pending: Mutex::new(HashMap::new()),
            events: std::sync::Mutex::new(Some(events_tx)),
            connected: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            next_sync_id: AtomicU64::new(1),
            cancel: CancellationToken::new(),
        });

        let conn = Self {
            inner,
            reader: std::sync::Mutex::new(Some(reader)),
            task: std::sync::Mutex::new(None),
            peer_addr,
        };
        (conn, events_rx)
    }

    /// Opens a socket to `addr` within `connect_timeout`.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        config: ConnectionConfig,
        connect_timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ConnectionEvent>), NetError> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| NetError::ConnectTimeout)??;
        Ok(Self::new(stream, config))
    }

    /// Starts the receive task and marks the connection connected.
    ///
    /// Returns once the task is running. May be called once.
    pub async fn initialize(&self) -> Result<(), NetError> {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return Err(NetError::AlreadyInitialized);
        }
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(NetError::Closed);
        }
        let reader = self
            .reader
            .lock()
            .ok()
            .and_then(|mut r| r.take())
            .ok_or(NetError::Closed)?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = tokio::spawn(receive_loop(self.inner.clone(), reader, ready_tx));
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }

        ready_rx.await.map_err(|_| NetError::Closed)?;
        if let Some(addr) = self.peer_addr {
            tracing::debug!(peer = %addr, "connection initialized");
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Writes one frame.
    ///
    /// An oversized message is refused and logged; the connection stays up.
    /// A failed or stalled write closes the connection.
    pub async fn send(&self, msg: WireMessage) -> Result<(), NetError> {
        if !self.is_connected() {
            return Err(NetError::NotConnected);
        }

        let frame = match encode_frame(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                self.inner.log(
                    LogLevel::Error,
                    format!("refusing to send {:?}: {e}", msg.msg_type),
                );
                return Err(e.into());
            }
        };

        let result = {
            let mut guard = self.inner.writer.lock().await;
            let writer = guard.as_mut().ok_or(NetError::Closed)?;
            tokio::time::timeout(self.inner.config.frame_timeout, async {
                writer.write_all(&frame).await?;
                writer.flush().await
            })
            .await
        };

        match result {
            Ok(Ok(())) => {
                if self.inner.config.verbose {
                    self.inner
                        .log(LogLevel::Debug, format!("sent {:?}", msg.msg_type));
                }
                Ok(())
            }
            Ok(Err(e)) => {
                self.inner
                    .teardown(Some((LogLevel::Error, format!("write failed: {e}"))))
                    .await;
                Err(NetError::Io(e))
            }
            Err(_) => {
                self.inner
                    .teardown(Some((LogLevel::Error, "write stalled".to_string())))
                    .await;
                Err(NetError::Stalled)
            }
        }
    }

    /// Sends `msg` tagged with a fresh sync id and waits for the reply.
    ///
    /// If no reply arrives within `timeout` the result is a TIMEOUT message,
    /// not an error. The pending slot is removed on every exit path.
    pub async fn send_sync(
        &self,
        msg: WireMessage,
        timeout: Duration,
    ) -> Result<WireMessage, NetError> {
        let id = self.inner.next_sync_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id, tx);

        if let Err(e) = self.send(msg.with_sync(id)).await {
            self.inner.pending.lock().await.remove(&id);
            return Err(e);
        }

        let result = tokio::time::timeout(timeout, rx).await;

        // Clean up pending entry on any exit path.
        self.inner.pending.lock().await.remove(&id);

        match result {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(NetError::Closed),
            Err(_) => Ok(WireMessage::timeout(id)),
        }
    }

    /// Number of synchronized sends still waiting for a reply.
    pub async fn pending_sync_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Closes the socket and stops the receive task. Idempotent.
    pub async fn close(&self) {
        self.inner.teardown(None).await;
        if let Some(addr) = self.peer_addr {
            tracing::debug!(peer = %addr, "connection closed");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.cancel.cancel();
        if let Ok(mut task) = self.task.lock()
            && let Some(handle) = task.take()
        {
            handle.abort();
        }
    }
}

async fn receive_loop(
    inner: Arc<Shared>,
    mut reader: OwnedReadHalf,
    ready: oneshot::Sender<()>,
) {
    inner.connected.store(true, Ordering::SeqCst);
    let _ = ready.send(());

    loop {
        let frame = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            frame = read_frame(&mut reader, inner.config.frame_timeout) => frame,
        };

        match frame {
            Ok(Some(msg)) => inner.deliver(msg).await,
            Ok(None) => {
                inner
                    .teardown(Some((
                        LogLevel::Info,
                        "peer closed the connection".to_string(),
                    )))
                    .await;
                break;
            }
            Err(e) => {
                inner
                    .teardown(Some((LogLevel::Error, format!("receive failed: {e}"))))
                    .await;
                break;
            }
        }
    }
    tracing::trace!("receive loop stopped");
}

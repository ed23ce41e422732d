//! The narrow view of a connection that dispatchers and machines use.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use systek_protocol::WireMessage;

use crate::connection::Connection;
use crate::error::NetError;

/// A boxed future returned by [`Link`] methods.
pub type LinkFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Send/close capability over a peer connection.
pub trait Link: Send + Sync {
    fn is_connected(&self) -> bool;

    fn send(&self, msg: WireMessage) -> LinkFuture<'_, Result<(), NetError>>;

    /// Sends and waits for the correlated reply; a TIMEOUT message is a
    /// normal outcome.
    fn send_sync(
        &self,
        msg: WireMessage,
        timeout: Duration,
    ) -> LinkFuture<'_, Result<WireMessage, NetError>>;

    fn close(&self) -> LinkFuture<'_, ()>;
}

impl Link for Connection {
    fn is_connected(&self) -> bool {
        Connection::is_connected(self)
    }

    fn send(&self, msg: WireMessage) -> LinkFuture<'_, Result<(), NetError>> {
        Box::pin(Connection::send(self, msg))
    }

    fn send_sync(
        &self,
        msg: WireMessage,
        timeout: Duration,
    ) -> LinkFuture<'_, Result<WireMessage, NetError>> {
        Box::pin(Connection::send_sync(self, msg, timeout))
    }

    fn close(&self) -> LinkFuture<'_, ()> {
        Box::pin(Connection::close(self))
    }
}

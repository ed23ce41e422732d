//! Handler trait and the pump that feeds it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use systek_protocol::{CodecError, WireMessage};

use crate::error::NetError;
use crate::events::{ConnectionEvent, LogSink};
use crate::link::Link;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Reacts to messages arriving on one connection.
///
/// Messages are handed over one at a time in arrival order; replies go back
/// through `link`.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle<'a>(&'a self, link: &'a dyn Link, msg: WireMessage) -> HandlerFuture<'a>;
}

/// Sends a handler's reply.
///
/// A reply too large to frame is replaced by a one-line FAIL carrying the
/// same sync tag and set id, so the peer still gets exactly one answer.
pub async fn send_reply(link: &dyn Link, reply: WireMessage) -> Result<(), NetError> {
    let msg_type = reply.msg_type;
    let sync = reply.sync;
    let command_set_id = reply.command_set_id;

    match link.send(reply).await {
        Err(NetError::Codec(CodecError::FrameTooLarge { size, max })) => {
            let mut fallback = WireMessage::fail(format!(
                "{msg_type:?} reply too large to send ({size} bytes, max {max})"
            ));
            fallback.command_set_id = command_set_id;
            fallback.sync = sync;
            link.send(fallback).await
        }
        other => other,
    }
}

/// Drains a connection's events until its channel closes.
///
/// Log events go to `sink` tagged with `server_id`; messages go to
/// `handler`.
pub async fn run_event_pump<H>(
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    link: Arc<dyn Link>,
    handler: Arc<H>,
    sink: Arc<dyn LogSink>,
    server_id: Option<u64>,
) where
    H: MessageHandler + ?Sized,
{
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Log(log) => sink.write(log.level, log.area, server_id, &log.message),
            ConnectionEvent::Message(msg) => handler.handle(link.as_ref(), msg).await,
        }
    }
    tracing::trace!(?server_id, "event pump finished");
}

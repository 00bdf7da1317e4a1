//! Outbound stanza plumbing.
//!
//! The call engine never touches a socket. Everything it emits goes through a
//! [`StanzaSender`], whose future resolves once the stanza has been handed to
//! the connection (or failed to be).

use async_trait::async_trait;
use callcore::Stanza;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("client is not connected")]
    NotConnected,
    #[error("connection lost before the operation completed")]
    ConnectionLost,
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait StanzaSender: Send + Sync {
    async fn send(&self, stanza: Stanza) -> Result<(), SendError>;
}

/// Sender that queues stanzas on an unbounded channel.
///
/// The receiving half is typically drained by the connection's writer task,
/// or by another in-process engine when wiring a loopback.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<Stanza>,
}

impl ChannelSender {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Stanza>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl StanzaSender for ChannelSender {
    async fn send(&self, stanza: Stanza) -> Result<(), SendError> {
        self.tx.send(stanza).map_err(|_| SendError::NotConnected)
    }
}

/// Generates request ids unique to one engine instance.
#[derive(Debug)]
pub(crate) struct RequestIds {
    prefix: String,
    counter: AtomicU64,
}

impl RequestIds {
    pub(crate) fn new() -> Self {
        Self {
            prefix: format!("{:04x}", rand::random::<u16>()),
            counter: AtomicU64::new(0),
        }
    }

    pub(crate) fn next(&self) -> String {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, count)
    }
}

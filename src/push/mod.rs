//! Push channel boundary.
//!
//! A [`PushChannel`] owns the live connection to the server. It reports its
//! lifecycle and decoded events as [`ChannelSignal`]s on the sender handed to
//! [`PushChannel::connect`], in receipt order, and carries the outbound
//! read-receipt messages. Reconnection policy belongs to the channel; the
//! stream reconciler only reacts to the signals.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::NotificationId;

pub mod lines;
pub mod wire;

pub use lines::{Backoff, LinesPushChannel};
pub use wire::{DecodeError, OutboundMessage, PushEvent, decode_event};

/// Lifecycle notifications and events emitted by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    /// A connection attempt started.
    Connecting,
    /// The connection is established and events will follow.
    Connected,
    /// The connection was lost or closed.
    Disconnected,
    /// A decoded inbound event.
    Event(PushEvent),
}

/// Sender half the channel reports into.
pub type SignalSender = mpsc::Sender<ChannelSignal>;

/// Errors returned by push channel adapters.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No live connection to send on.
    #[error("push channel not connected")]
    NotConnected,
    /// This adapter never connects.
    #[error("push channel unavailable")]
    Unavailable,
    /// The channel was shut down while the request was pending.
    #[error("push channel closed")]
    Closed,
    /// Socket failure.
    #[error("push channel I/O: {0}")]
    Io(#[from] std::io::Error),
    /// The outbound message could not be encoded.
    #[error("push message encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Bidirectional live channel to the notification server.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Start connecting, reporting progress and events on `signals`.
    ///
    /// Calling `connect` on an already running channel is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Unavailable`] when the adapter cannot connect at
    /// all.
    async fn connect(&self, signals: SignalSender) -> Result<(), ChannelError>;

    /// Close the connection and stop reconnecting.
    async fn disconnect(&self);

    /// Whether a connection is currently established.
    fn is_connected(&self) -> bool;

    /// Send a message, resolving once it has been written.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotConnected`] without a live connection, or the
    /// write failure.
    async fn send(&self, message: OutboundMessage) -> Result<(), ChannelError>;

    /// Ask the server to mark one notification read.
    ///
    /// # Errors
    ///
    /// See [`PushChannel::send`].
    async fn mark_as_read(&self, id: &NotificationId) -> Result<(), ChannelError> {
        self.send(OutboundMessage::MarkAsRead {
            notification_id: id.clone(),
        })
        .await
    }

    /// Ask the server to mark every notification read.
    ///
    /// # Errors
    ///
    /// See [`PushChannel::send`].
    async fn mark_all_as_read(&self) -> Result<(), ChannelError> {
        self.send(OutboundMessage::MarkAllAsRead).await
    }
}

/// Channel that never connects, leaving the session on REST and polling.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPushChannel;

#[async_trait]
impl PushChannel for NoopPushChannel {
    async fn connect(&self, _signals: SignalSender) -> Result<(), ChannelError> {
        Err(ChannelError::Unavailable)
    }

    async fn disconnect(&self) {}

    fn is_connected(&self) -> bool { false }

    async fn send(&self, _message: OutboundMessage) -> Result<(), ChannelError> {
        Err(ChannelError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[tokio::test]
    async fn noop_channel_reports_unavailable() {
        let channel = NoopPushChannel;
        let (tx, _rx) = mpsc::channel(1);

        let connect = channel.connect(tx).await.expect_err("connect should fail");
        let send = channel
            .mark_as_read(&NotificationId::from("n1"))
            .await
            .expect_err("send should fail");

        assert!(matches!(connect, ChannelError::Unavailable));
        assert!(matches!(send, ChannelError::Unavailable));
        assert!(!channel.is_connected());
    }
}

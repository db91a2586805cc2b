//! Loopback push server speaking newline-delimited JSON.
//!
//! Tests accept the connection opened by `LinesPushChannel`, then script the
//! server side one line at a time.

use std::io;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;

/// Listener bound to an ephemeral loopback port.
pub struct PushServer {
    listener: TcpListener,
}

impl PushServer {
    /// Bind to `127.0.0.1:0`.
    ///
    /// # Errors
    ///
    /// Returns any bind failure.
    pub async fn bind() -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        Ok(Self { listener })
    }

    /// `host:port` to hand to the channel under test.
    ///
    /// # Errors
    ///
    /// Returns the failure to read the bound address.
    pub fn addr(&self) -> io::Result<String> { Ok(self.listener.local_addr()?.to_string()) }

    /// Wait for the next client connection.
    ///
    /// # Errors
    ///
    /// Returns any accept failure.
    pub async fn accept(&self) -> io::Result<PushConnection> {
        let (stream, peer) = self.listener.accept().await?;
        debug!(%peer, "push client connected");
        Ok(PushConnection {
            framed: Framed::new(stream, LinesCodec::new()),
        })
    }
}

/// Server side of one accepted push connection. Dropping it closes the
/// socket.
pub struct PushConnection {
    framed: Framed<TcpStream, LinesCodec>,
}

impl PushConnection {
    /// Write one line to the client.
    ///
    /// # Errors
    ///
    /// Returns the write failure.
    pub async fn send(&mut self, line: &str) -> Result<(), LinesCodecError> {
        self.framed.send(line).await
    }

    /// Next line written by the client, or `None` once it hangs up.
    pub async fn recv(&mut self) -> Option<String> {
        match self.framed.next().await {
            Some(Ok(line)) => Some(line),
            Some(Err(error)) => {
                debug!(%error, "push client read failed");
                None
            }
            None => None,
        }
    }
}

/// Inbound frames as the server would send them.
pub mod frames {
    use serde_json::json;

    /// A new unread notification titled after its id.
    #[must_use]
    pub fn notification(id: &str) -> String {
        json!({
            "type": "notification",
            "notification": {
                "id": id,
                "title": id,
                "type": "system",
                "priority": "normal",
                "isRead": false,
                "createdAt": "2024-05-01T12:00:00Z",
            },
        })
        .to_string()
    }

    /// Authoritative unread total.
    #[must_use]
    pub fn unread_count(count: u32) -> String {
        json!({ "type": "unread_count", "count": count }).to_string()
    }

    /// Read receipt for `id`.
    #[must_use]
    pub fn notification_read(id: &str) -> String {
        json!({ "type": "notification_read", "notificationId": id }).to_string()
    }

    /// Archive notice for `id`.
    #[must_use]
    pub fn notification_archived(id: &str) -> String {
        json!({ "type": "notification_archived", "notificationId": id }).to_string()
    }
}

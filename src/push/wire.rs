//! JSON wire format for the push channel.
//!
//! Every message is an object tagged by a `type` field. Inbound messages are
//! decoded into [`PushEvent`]s at the channel boundary; outbound messages are
//! encoded from [`OutboundMessage`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{NotificationId, NotificationRecord};

/// Event received from the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// A notification the client has not seen yet.
    NewNotification(NotificationRecord),
    /// Authoritative unread total.
    UnreadCountSnapshot(u32),
    /// A notification was read, possibly on another device.
    ReadReceipt(NotificationId),
    /// A notification was archived.
    Archived(NotificationId),
    /// The channel reported a failure.
    ChannelError(String),
}

/// Failures decoding an inbound frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON or a known message has the wrong shape.
    #[error("malformed push message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The frame has no string `type` field.
    #[error("push message without type discriminator")]
    MissingType,
    /// The `type` field names a message this client does not understand.
    #[error("unknown push message type {0:?}")]
    UnknownType(String),
}

impl DecodeError {
    /// Whether the frame should be skipped rather than treated as a channel
    /// failure.
    #[must_use]
    pub const fn is_ignorable(&self) -> bool { matches!(self, Self::UnknownType(_)) }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    Notification {
        notification: NotificationRecord,
    },
    UnreadCount {
        count: u32,
    },
    #[serde(rename_all = "camelCase")]
    NotificationRead {
        notification_id: NotificationId,
    },
    #[serde(rename_all = "camelCase")]
    NotificationArchived {
        notification_id: NotificationId,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

const KNOWN_TYPES: [&str; 5] = [
    "notification",
    "unread_count",
    "notification_read",
    "notification_archived",
    "error",
];

impl From<Inbound> for PushEvent {
    fn from(message: Inbound) -> Self {
        match message {
            Inbound::Notification { notification } => Self::NewNotification(notification),
            Inbound::UnreadCount { count } => Self::UnreadCountSnapshot(count),
            Inbound::NotificationRead { notification_id } => Self::ReadReceipt(notification_id),
            Inbound::NotificationArchived { notification_id } => Self::Archived(notification_id),
            Inbound::Error { message } => Self::ChannelError(message),
        }
    }
}

/// Decode one inbound frame.
///
/// # Errors
///
/// Returns [`DecodeError::UnknownType`] for well-formed frames of an
/// unrecognised type, and the other variants for malformed frames.
///
/// # Examples
///
/// ```
/// use notiflow::push::{PushEvent, decode_event};
///
/// let event = decode_event(r#"{"type":"unread_count","count":3}"#).expect("decode");
/// assert_eq!(event, PushEvent::UnreadCountSnapshot(3));
/// ```
pub fn decode_event(frame: &str) -> Result<PushEvent, DecodeError> {
    let value: Value = serde_json::from_str(frame)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?;
    if !KNOWN_TYPES.contains(&kind) {
        return Err(DecodeError::UnknownType(kind.to_owned()));
    }
    let message: Inbound = serde_json::from_value(value)?;
    Ok(message.into())
}

/// Message the client sends over the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Mark one notification read; the server fans out a read receipt.
    #[serde(rename_all = "camelCase")]
    MarkAsRead {
        /// Notification to mark.
        notification_id: NotificationId,
    },
    /// Mark every notification read.
    MarkAllAsRead,
}

impl OutboundMessage {
    /// Encode as a single JSON line (without the terminator).
    ///
    /// # Errors
    ///
    /// Propagates serialisation failures.
    pub fn encode(&self) -> Result<String, serde_json::Error> { serde_json::to_string(self) }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn decodes_new_notification() {
        let frame = r#"{"type":"notification","notification":{"id":"n9","title":"Risk raised","type":"warning","createdAt":"2024-05-01T12:00:00Z"}}"#;

        let event = decode_event(frame).expect("decode");

        let PushEvent::NewNotification(record) = event else {
            panic!("expected new notification, got {event:?}");
        };
        assert_eq!(record.id.as_str(), "n9");
        assert!(!record.is_read());
    }

    #[rstest]
    #[case(r#"{"type":"unread_count","count":4}"#, PushEvent::UnreadCountSnapshot(4))]
    #[case(
        r#"{"type":"notification_read","notificationId":"n1"}"#,
        PushEvent::ReadReceipt(NotificationId::from("n1"))
    )]
    #[case(
        r#"{"type":"notification_archived","notificationId":"n2"}"#,
        PushEvent::Archived(NotificationId::from("n2"))
    )]
    #[case(r#"{"type":"error","message":"token expired"}"#, PushEvent::ChannelError("token expired".to_owned()))]
    #[case(r#"{"type":"error"}"#, PushEvent::ChannelError(String::new()))]
    fn decodes_simple_events(#[case] frame: &str, #[case] expected: PushEvent) {
        assert_eq!(decode_event(frame).expect("decode"), expected);
    }

    #[rstest]
    fn unknown_type_is_ignorable() {
        let err = decode_event(r#"{"type":"typing","user":"u1"}"#).expect_err("unknown");

        assert!(matches!(&err, DecodeError::UnknownType(kind) if kind == "typing"));
        assert!(err.is_ignorable());
    }

    #[rstest]
    #[case("not json")]
    #[case(r#"{"count":1}"#)]
    #[case(r#"{"type":7}"#)]
    #[case(r#"{"type":"unread_count","count":-1}"#)]
    #[case(r#"{"type":"notification_read"}"#)]
    fn malformed_frames_are_not_ignorable(#[case] frame: &str) {
        let err = decode_event(frame).expect_err("malformed");

        assert!(!err.is_ignorable());
    }

    #[rstest]
    fn encodes_outbound_messages() {
        let read = OutboundMessage::MarkAsRead {
            notification_id: NotificationId::from("n1"),
        };

        assert_eq!(
            read.encode().expect("encode"),
            r#"{"type":"mark_as_read","notificationId":"n1"}"#
        );
        assert_eq!(
            OutboundMessage::MarkAllAsRead.encode().expect("encode"),
            r#"{"type":"mark_all_as_read"}"#
        );
    }
}

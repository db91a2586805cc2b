//! Notification records as exchanged with the remote source and the push
//! channel.
//!
//! Records decode from camelCase JSON. The `isRead`/`readAt` pair is
//! normalised at the decode boundary so that `read_at` is present exactly
//! when the record is read; after that only [`NotificationRecord::mark_read`]
//! and [`NotificationRecord::mark_unread`] can change it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, stable notification identifier assigned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    /// Wrap a server-assigned identifier.
    ///
    /// # Examples
    ///
    /// ```
    /// use notiflow::models::NotificationId;
    ///
    /// let id = NotificationId::new("n-42");
    /// assert_eq!(id.as_str(), "n-42");
    /// ```
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for NotificationId {
    fn from(value: &str) -> Self { Self(value.to_owned()) }
}

impl From<String> for NotificationId {
    fn from(value: String) -> Self { Self(value) }
}

/// Category of a notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// An operation completed.
    Success,
    /// Something needs attention.
    Warning,
    /// Something failed.
    Error,
    /// Generated by the platform itself.
    #[default]
    System,
    /// Application-defined; unknown server types decode here.
    #[serde(other)]
    Custom,
}

/// Urgency of a notification.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    /// Informational.
    Low,
    /// Regular notification.
    #[default]
    Normal,
    /// Should be surfaced promptly.
    High,
    /// Requires immediate attention.
    Critical,
}

/// One notification surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireRecord")]
pub struct NotificationRecord {
    /// Server-assigned identifier.
    pub id: NotificationId,
    /// Headline shown to the user.
    pub title: String,
    /// Optional body text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Notification category, `type` on the wire.
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// Urgency.
    pub priority: NotificationPriority,
    is_read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    read_at: Option<DateTime<Utc>>,
    /// Label for the optional call to action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_label: Option<String>,
    /// Target of the optional call to action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    /// Creation time on the server.
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Create an unread record with default type and priority.
    #[must_use]
    pub fn new(
        id: impl Into<NotificationId>,
        title: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            message: None,
            kind: NotificationType::default(),
            priority: NotificationPriority::default(),
            is_read: false,
            read_at: None,
            action_label: None,
            action_url: None,
            created_at,
        }
    }

    /// Set the body text.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the category.
    #[must_use]
    pub fn with_kind(mut self, kind: NotificationType) -> Self {
        self.kind = kind;
        self
    }

    /// Set the urgency.
    #[must_use]
    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Attach a call to action.
    #[must_use]
    pub fn with_action(mut self, label: impl Into<String>, url: impl Into<String>) -> Self {
        self.action_label = Some(label.into());
        self.action_url = Some(url.into());
        self
    }

    /// Return the record marked read at `at`.
    #[must_use]
    pub fn read(mut self, at: DateTime<Utc>) -> Self {
        self.mark_read(at);
        self
    }

    /// Whether the user has read this notification.
    #[must_use]
    pub const fn is_read(&self) -> bool { self.is_read }

    /// When the notification was read, present iff [`Self::is_read`].
    #[must_use]
    pub const fn read_at(&self) -> Option<DateTime<Utc>> { self.read_at }

    /// Mark the record read.
    ///
    /// Returns `false` without touching `read_at` when it was already read.
    pub fn mark_read(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_read {
            return false;
        }
        self.is_read = true;
        self.read_at = Some(at);
        true
    }

    /// Mark the record unread, clearing `read_at`.
    ///
    /// Returns `false` when it was already unread.
    pub fn mark_unread(&mut self) -> bool {
        if !self.is_read {
            return false;
        }
        self.is_read = false;
        self.read_at = None;
        true
    }
}

/// Record shape as sent by the server, before normalisation.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    id: NotificationId,
    title: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "type", default)]
    kind: NotificationType,
    #[serde(default)]
    priority: NotificationPriority,
    #[serde(default)]
    is_read: bool,
    #[serde(default)]
    read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    action_label: Option<String>,
    #[serde(default)]
    action_url: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<WireRecord> for NotificationRecord {
    fn from(wire: WireRecord) -> Self {
        let read_at = if wire.is_read {
            Some(wire.read_at.unwrap_or(wire.created_at))
        } else {
            None
        };
        Self {
            id: wire.id,
            title: wire.title,
            message: wire.message,
            kind: wire.kind,
            priority: wire.priority,
            is_read: wire.is_read,
            read_at,
            action_label: wire.action_label,
            action_url: wire.action_url,
            created_at: wire.created_at,
        }
    }
}

/// One page of the notification list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    /// Records on this page, newest first.
    #[serde(default)]
    pub notifications: Vec<NotificationRecord>,
    /// Server-side unread total across all pages.
    #[serde(default)]
    pub unread_count: u32,
}

impl NotificationPage {
    /// Identifier of the newest record on the page.
    #[must_use]
    pub fn newest_id(&self) -> Option<&NotificationId> {
        self.notifications.first().map(|record| &record.id)
    }

    /// Whether the page came back full, suggesting more records follow.
    #[must_use]
    pub fn is_full(&self, page_size: u32) -> bool {
        usize::try_from(page_size).is_ok_and(|size| self.notifications.len() >= size)
    }
}

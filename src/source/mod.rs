//! Remote notification source boundary.
//!
//! The [`NotificationSource`] trait is the authoritative side of every sync
//! decision: the poll fallback reads from it, and the mutation gateway
//! confirms against it (and re-fetches from it on failure). The REST adapter
//! lives in [`rest`].

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{NotificationId, NotificationPage};

pub mod rest;

pub use rest::RestNotificationSource;

/// Errors raised by a notification source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body, if any.
        message: String,
    },
    /// The request did not complete.
    #[error("network: {0}")]
    Network(#[from] reqwest::Error),
    /// The response body did not have the expected shape.
    #[error("decode: {0}")]
    Decode(String),
    /// An endpoint URL could not be built.
    #[error("invalid endpoint: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Remote side of the notification list.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// Fetch `limit` records starting at `offset`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the request fails or the body is malformed.
    async fn fetch_page(&self, limit: u32, offset: u32) -> Result<NotificationPage, SourceError>;

    /// Mark one notification read.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the server does not confirm the change.
    async fn mark_as_read(&self, id: &NotificationId) -> Result<(), SourceError>;

    /// Mark every notification read.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the server does not confirm the change.
    async fn mark_all_as_read(&self) -> Result<(), SourceError>;

    /// Archive one notification.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the server does not confirm the change.
    async fn archive(&self, id: &NotificationId) -> Result<(), SourceError>;

    /// Delete one notification.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the server does not confirm the change.
    async fn delete(&self, id: &NotificationId) -> Result<(), SourceError>;
}

//! Optimistic mutation gateway.
//!
//! User actions are applied to the projection before any network call, then
//! confirmed against the server. Read operations go over the push channel
//! when the reconciler is connected and over REST otherwise; archive and
//! delete always use REST. When confirmation fails the gateway re-fetches the
//! first page to discard the optimistic change and then reports the failure
//! to the caller. If that re-fetch fails too, the captured snapshot is put
//! back instead.

use std::{fmt, sync::Arc};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    models::NotificationId,
    projection::{FaultOrigin, ProjectionState, ProjectionStore, SyncFault},
    push::{ChannelError, PushChannel},
    reconciler::StreamReconciler,
    source::{NotificationSource, SourceError},
};

/// User-initiated mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// Mark one notification read.
    MarkAsRead,
    /// Mark every notification read.
    MarkAllAsRead,
    /// Archive one notification.
    Archive,
    /// Delete one notification.
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MarkAsRead => "mark notification as read",
            Self::MarkAllAsRead => "mark all notifications as read",
            Self::Archive => "archive notification",
            Self::Delete => "delete notification",
        })
    }
}

/// Failure to confirm a mutation. The projection has already been rolled
/// back when this is returned.
#[derive(Debug, Error)]
pub enum MutationError {
    /// The REST confirmation failed.
    #[error("failed to {kind}: {source}")]
    Source {
        /// Mutation that failed.
        kind: MutationKind,
        /// Underlying failure.
        source: SourceError,
    },
    /// Sending the confirmation over the push channel failed.
    #[error("failed to {kind} over push channel: {source}")]
    Channel {
        /// Mutation that failed.
        kind: MutationKind,
        /// Underlying failure.
        source: ChannelError,
    },
    /// The session was shut down.
    #[error("notification session closed")]
    SessionClosed,
}

impl MutationError {
    /// Mutation that failed, if any.
    #[must_use]
    pub const fn kind(&self) -> Option<MutationKind> {
        match self {
            Self::Source { kind, .. } | Self::Channel { kind, .. } => Some(*kind),
            Self::SessionClosed => None,
        }
    }
}

/// Confirmation route chosen for one mutation.
enum Route {
    Channel,
    Rest,
}

/// Applies user mutations optimistically and confirms them.
pub struct MutationGateway {
    store: Arc<ProjectionStore>,
    source: Arc<dyn NotificationSource>,
    channel: Arc<dyn PushChannel>,
    reconciler: Arc<StreamReconciler>,
    page_size: u32,
}

impl MutationGateway {
    /// Create a gateway over the session's collaborators.
    #[must_use]
    pub fn new(
        store: Arc<ProjectionStore>,
        source: Arc<dyn NotificationSource>,
        channel: Arc<dyn PushChannel>,
        reconciler: Arc<StreamReconciler>,
        page_size: u32,
    ) -> Self {
        Self {
            store,
            source,
            channel,
            reconciler,
            page_size,
        }
    }

    fn read_route(&self) -> Route {
        if self.reconciler.is_connected() && self.channel.is_connected() {
            Route::Channel
        } else {
            Route::Rest
        }
    }

    fn ensure_open(&self) -> Result<(), MutationError> {
        if self.store.is_closed() {
            return Err(MutationError::SessionClosed);
        }
        Ok(())
    }

    /// Mark one notification read.
    ///
    /// A record already read locally is left alone and nothing is sent.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError`] after rolling back when the server does not
    /// confirm the change.
    pub async fn mark_as_read(&self, id: &NotificationId) -> Result<(), MutationError> {
        self.ensure_open()?;
        if self.store.snapshot().find(id).is_some_and(|record| record.is_read()) {
            debug!(notification_id = %id, "already read; nothing to confirm");
            return Ok(());
        }
        let _pending = self.store.begin_mutation();
        let snapshot = self.store.patch_read_status(id, true, Utc::now());
        let result = match self.read_route() {
            Route::Channel => self.channel.mark_as_read(id).await.map_err(|source| {
                MutationError::Channel {
                    kind: MutationKind::MarkAsRead,
                    source,
                }
            }),
            Route::Rest => self.source.mark_as_read(id).await.map_err(|source| {
                MutationError::Source {
                    kind: MutationKind::MarkAsRead,
                    source,
                }
            }),
        };
        self.settle(&snapshot, result).await
    }

    /// Mark every notification read and zero the unread counter.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError`] after rolling back when the server does not
    /// confirm the change.
    pub async fn mark_all_as_read(&self) -> Result<(), MutationError> {
        self.ensure_open()?;
        let _pending = self.store.begin_mutation();
        let snapshot = self.store.mark_all_read(Utc::now());
        let result = match self.read_route() {
            Route::Channel => self.channel.mark_all_as_read().await.map_err(|source| {
                MutationError::Channel {
                    kind: MutationKind::MarkAllAsRead,
                    source,
                }
            }),
            Route::Rest => self.source.mark_all_as_read().await.map_err(|source| {
                MutationError::Source {
                    kind: MutationKind::MarkAllAsRead,
                    source,
                }
            }),
        };
        self.settle(&snapshot, result).await
    }

    /// Archive one notification, removing it from the projection.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError`] after rolling back when the server does not
    /// confirm the change.
    pub async fn archive(&self, id: &NotificationId) -> Result<(), MutationError> {
        self.ensure_open()?;
        let _pending = self.store.begin_mutation();
        let snapshot = self.store.remove(id);
        let result = self
            .source
            .archive(id)
            .await
            .map_err(|source| MutationError::Source {
                kind: MutationKind::Archive,
                source,
            });
        self.settle(&snapshot, result).await
    }

    /// Delete one notification, removing it from the projection.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError`] after rolling back when the server does not
    /// confirm the change.
    pub async fn delete(&self, id: &NotificationId) -> Result<(), MutationError> {
        self.ensure_open()?;
        let _pending = self.store.begin_mutation();
        let snapshot = self.store.remove(id);
        let result = self
            .source
            .delete(id)
            .await
            .map_err(|source| MutationError::Source {
                kind: MutationKind::Delete,
                source,
            });
        self.settle(&snapshot, result).await
    }

    async fn settle(
        &self,
        snapshot: &ProjectionState,
        result: Result<(), MutationError>,
    ) -> Result<(), MutationError> {
        let Err(error) = result else {
            return Ok(());
        };
        warn!(%error, "mutation not confirmed; rolling back");
        match self.source.fetch_page(self.page_size, 0).await {
            Ok(page) => {
                let has_more = page.is_full(self.page_size);
                self.store
                    .replace_all(page.notifications, page.unread_count, has_more);
            }
            Err(refresh_error) => {
                warn!(error = %refresh_error, "rollback refresh failed; restoring snapshot");
                self.store.restore(snapshot);
            }
        }
        if let Some(kind) = error.kind() {
            self.store
                .set_fault(Some(SyncFault::new(FaultOrigin::Mutation(kind), &error)));
        }
        Err(error)
    }
}

#[cfg(test)]
mod tests;

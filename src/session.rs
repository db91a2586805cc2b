//! Notification session.
//!
//! A session wires the projection store, stream reconciler, poll fallback and
//! mutation gateway around one [`NotificationSource`] and one
//! [`PushChannel`]. Building it performs the initial refresh, starts the
//! signal and poll tasks, and asks the channel to connect. Consumers read
//! snapshots or subscribe through the session, and route every user action
//! through it.

use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    gateway::{MutationError, MutationGateway},
    models::{NotificationId, NotificationRecord},
    poller::PollFallback,
    projection::{FaultOrigin, ProjectionState, ProjectionStore, SubscriptionId, SyncFault},
    push::PushChannel,
    reconciler::{ChannelState, StreamReconciler, ToastSink},
    source::{NotificationSource, SourceError},
};

const SIGNAL_QUEUE: usize = 64;

/// How the poll fallback treats ticks that race an optimistic mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RacePolicy {
    /// Apply every tick; a poll landing mid-mutation may briefly show the
    /// pre-mutation server state until the confirmation settles.
    #[default]
    LastWriteWins,
    /// Skip ticks while any optimistic mutation awaits confirmation.
    DeferWhileMutating,
}

/// Tunables for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Records per page for refreshes, polls and `load_more`.
    pub page_size: u32,
    /// Poll period while the push channel is down.
    pub poll_interval: Duration,
    /// Poll/mutation race handling.
    pub race_policy: RacePolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            poll_interval: Duration::from_secs(60),
            race_policy: RacePolicy::LastWriteWins,
        }
    }
}

/// Configures and starts a [`NotificationSession`].
pub struct SessionBuilder {
    source: Arc<dyn NotificationSource>,
    channel: Arc<dyn PushChannel>,
    settings: SyncSettings,
    toast: Option<ToastSink>,
}

impl SessionBuilder {
    /// Replace the default settings.
    #[must_use]
    pub const fn settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Surface every pushed notification through `sink`.
    #[must_use]
    pub fn toast<F>(mut self, sink: F) -> Self
    where
        F: Fn(&NotificationRecord) + Send + Sync + 'static,
    {
        self.toast = Some(Arc::new(sink));
        self
    }

    /// Refresh once, then start the signal and poll tasks and connect.
    ///
    /// A failing initial refresh or an unavailable channel does not stop the
    /// session: the fault is recorded on the projection and polling carries
    /// on.
    pub async fn start(self) -> NotificationSession {
        let Self {
            source,
            channel,
            settings,
            toast,
        } = self;
        let store = Arc::new(ProjectionStore::new());
        let reconciler = Arc::new(StreamReconciler::new(Arc::clone(&store), toast));
        let gateway = MutationGateway::new(
            Arc::clone(&store),
            Arc::clone(&source),
            Arc::clone(&channel),
            Arc::clone(&reconciler),
            settings.page_size,
        );
        let cancel = CancellationToken::new();
        let mut session = NotificationSession {
            store,
            source,
            channel,
            reconciler,
            gateway,
            settings,
            cancel,
            signal_task: None,
            poll_task: None,
        };

        if let Err(error) = session.refresh().await {
            warn!(%error, "initial notification refresh failed");
        }

        let (signals, signal_rx) = mpsc::channel(SIGNAL_QUEUE);
        session.signal_task = Some(tokio::spawn(Arc::clone(&session.reconciler).run(signal_rx)));
        if let Err(error) = session.channel.connect(signals).await {
            info!(%error, "push channel not connecting; relying on polling");
        }

        let poller = PollFallback::new(
            Arc::clone(&session.store),
            Arc::clone(&session.source),
            settings.page_size,
            settings.poll_interval,
            settings.race_policy,
        );
        session.poll_task = Some(tokio::spawn(
            poller.run(session.reconciler.subscribe_state(), session.cancel.clone()),
        ));
        info!(
            page_size = settings.page_size,
            poll_interval = ?settings.poll_interval,
            "notification session started"
        );
        session
    }
}

/// Running notification sync for one user.
pub struct NotificationSession {
    store: Arc<ProjectionStore>,
    source: Arc<dyn NotificationSource>,
    channel: Arc<dyn PushChannel>,
    reconciler: Arc<StreamReconciler>,
    gateway: MutationGateway,
    settings: SyncSettings,
    cancel: CancellationToken,
    signal_task: Option<JoinHandle<()>>,
    poll_task: Option<JoinHandle<()>>,
}

impl NotificationSession {
    /// Start configuring a session over `source` and `channel`.
    #[must_use]
    pub fn builder(
        source: Arc<dyn NotificationSource>,
        channel: Arc<dyn PushChannel>,
    ) -> SessionBuilder {
        SessionBuilder {
            source,
            channel,
            settings: SyncSettings::default(),
            toast: None,
        }
    }

    /// The projection store this session feeds.
    #[must_use]
    pub const fn projection(&self) -> &Arc<ProjectionStore> { &self.store }

    /// Current projection snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ProjectionState> { self.store.snapshot() }

    /// Register a projection change handler.
    pub fn on_projection_changed<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Arc<ProjectionState>) + Send + Sync + 'static,
    {
        self.store.on_projection_changed(handler)
    }

    /// Remove a projection change handler.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool { self.store.unsubscribe(id) }

    /// Push channel state as seen by the reconciler.
    #[must_use]
    pub fn channel_state(&self) -> ChannelState { self.reconciler.state() }

    /// Settings the session was started with.
    #[must_use]
    pub const fn settings(&self) -> &SyncSettings { &self.settings }

    /// Replace the projection with the first page from the source.
    ///
    /// # Errors
    ///
    /// Returns the [`SourceError`] after recording it on the projection as a
    /// [`FaultOrigin::Refresh`] fault.
    pub async fn refresh(&self) -> Result<(), SourceError> {
        if self.store.is_closed() {
            return Ok(());
        }
        self.store.set_loading(true);
        match self.source.fetch_page(self.settings.page_size, 0).await {
            Ok(page) => {
                let has_more = page.is_full(self.settings.page_size);
                debug!(
                    fetched = page.notifications.len(),
                    unread_count = page.unread_count,
                    "notifications refreshed"
                );
                self.store
                    .replace_all(page.notifications, page.unread_count, has_more);
                Ok(())
            }
            Err(error) => {
                warn!(%error, "notification refresh failed");
                self.store
                    .set_fault(Some(SyncFault::new(FaultOrigin::Refresh, &error)));
                Err(error)
            }
        }
    }

    /// Append the next page, if the projection says there is one.
    ///
    /// Returns whether further pages remain.
    ///
    /// # Errors
    ///
    /// Returns the [`SourceError`] after recording it on the projection as a
    /// [`FaultOrigin::LoadMore`] fault.
    pub async fn load_more(&self) -> Result<bool, SourceError> {
        let current = self.store.snapshot();
        if self.store.is_closed() || !current.has_more_pages() {
            return Ok(false);
        }
        let offset = u32::try_from(current.records().len()).unwrap_or(u32::MAX);
        self.store.set_loading(true);
        match self.source.fetch_page(self.settings.page_size, offset).await {
            Ok(page) => {
                let has_more = page.is_full(self.settings.page_size);
                debug!(offset, fetched = page.notifications.len(), "loaded more notifications");
                self.store.append_page(page.notifications, has_more);
                Ok(has_more)
            }
            Err(error) => {
                warn!(%error, offset, "loading more notifications failed");
                self.store
                    .set_fault(Some(SyncFault::new(FaultOrigin::LoadMore, &error)));
                Err(error)
            }
        }
    }

    /// Mark one notification read.
    ///
    /// # Errors
    ///
    /// See [`MutationGateway::mark_as_read`].
    pub async fn mark_as_read(&self, id: &NotificationId) -> Result<(), MutationError> {
        self.gateway.mark_as_read(id).await
    }

    /// Mark every notification read.
    ///
    /// # Errors
    ///
    /// See [`MutationGateway::mark_all_as_read`].
    pub async fn mark_all_as_read(&self) -> Result<(), MutationError> {
        self.gateway.mark_all_as_read().await
    }

    /// Archive one notification.
    ///
    /// # Errors
    ///
    /// See [`MutationGateway::archive`].
    pub async fn archive(&self, id: &NotificationId) -> Result<(), MutationError> {
        self.gateway.archive(id).await
    }

    /// Delete one notification.
    ///
    /// # Errors
    ///
    /// See [`MutationGateway::delete`].
    pub async fn delete(&self, id: &NotificationId) -> Result<(), MutationError> {
        self.gateway.delete(id).await
    }

    /// Tear the session down.
    ///
    /// Observers stop firing first, then the poll task and the signal task
    /// end, and finally the channel disconnects.
    pub async fn shutdown(mut self) {
        self.store.close();
        self.cancel.cancel();
        if let Some(task) = self.poll_task.take() {
            if let Err(error) = task.await {
                warn!(%error, "poll task ended abnormally");
            }
        }
        if let Some(task) = self.signal_task.take() {
            task.abort();
            match task.await {
                Err(error) if !error.is_cancelled() => {
                    warn!(%error, "signal task ended abnormally");
                }
                _ => {}
            }
        }
        self.channel.disconnect().await;
        info!("notification session stopped");
    }
}

impl Drop for NotificationSession {
    fn drop(&mut self) {
        self.store.close();
        self.cancel.cancel();
        if let Some(task) = self.signal_task.take() {
            task.abort();
        }
    }
}

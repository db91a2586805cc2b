//! Stream reconciler.
//!
//! Translates push channel signals into projection mutations. The reconciler
//! tracks the channel state (`Disconnected → Connecting → Connected`) and
//! applies events only while `Connected`; anything arriving in another state
//! is dropped without buffering, and the poll fallback catches up after the
//! next `Connected` transition.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::{
    models::NotificationRecord,
    projection::ProjectionStore,
    push::{ChannelSignal, PushEvent},
};

/// Connection state as seen by the reconciler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelState {
    /// No live connection.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Events are being applied.
    Connected,
}

/// Callback surfacing a freshly pushed notification (a toast in a UI shell).
pub type ToastSink = Arc<dyn Fn(&NotificationRecord) + Send + Sync>;

/// Applies push channel signals to the projection.
pub struct StreamReconciler {
    store: Arc<ProjectionStore>,
    state: watch::Sender<ChannelState>,
    toast: Option<ToastSink>,
}

impl StreamReconciler {
    /// Create a reconciler in the `Disconnected` state.
    #[must_use]
    pub fn new(store: Arc<ProjectionStore>, toast: Option<ToastSink>) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            store,
            state,
            toast,
        }
    }

    /// Current channel state.
    #[must_use]
    pub fn state(&self) -> ChannelState { *self.state.borrow() }

    /// Whether events are currently being applied.
    #[must_use]
    pub fn is_connected(&self) -> bool { self.state() == ChannelState::Connected }

    /// Watch channel state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> { self.state.subscribe() }

    fn transition(&self, next: ChannelState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            info!(state = ?next, "push channel state changed");
        }
    }

    /// Handle one signal from the channel.
    pub fn handle_signal(&self, signal: ChannelSignal) {
        match signal {
            ChannelSignal::Connecting => self.transition(ChannelState::Connecting),
            ChannelSignal::Connected => self.transition(ChannelState::Connected),
            ChannelSignal::Disconnected => self.transition(ChannelState::Disconnected),
            ChannelSignal::Event(event) => {
                self.apply(event);
            }
        }
    }

    /// Apply one push event. Returns whether it was applied.
    pub fn apply(&self, event: PushEvent) -> bool {
        if !self.is_connected() {
            debug!(state = ?self.state(), "ignoring push event while not connected");
            return false;
        }
        match event {
            PushEvent::NewNotification(record) => {
                debug!(notification_id = %record.id, "new notification pushed");
                self.store.prepend(record.clone());
                if let Some(toast) = &self.toast {
                    toast(&record);
                }
            }
            PushEvent::UnreadCountSnapshot(count) => {
                debug!(unread_count = count, "unread count snapshot");
                self.store.set_unread_count(count);
            }
            PushEvent::ReadReceipt(id) => {
                self.store.patch_read_status(&id, true, Utc::now());
            }
            PushEvent::Archived(id) => {
                self.store.remove(&id);
            }
            PushEvent::ChannelError(message) => {
                warn!(%message, "push channel error");
                self.transition(ChannelState::Disconnected);
            }
        }
        true
    }

    /// Consume signals until the channel side hangs up.
    pub async fn run(self: Arc<Self>, mut signals: mpsc::Receiver<ChannelSignal>) {
        while let Some(signal) = signals.recv().await {
            self.handle_signal(signal);
        }
        self.transition(ChannelState::Disconnected);
        debug!("push signal stream ended");
    }
}

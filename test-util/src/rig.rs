//! A session wired to in-memory fakes.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use notiflow::{
    models::{NotificationId, NotificationRecord},
    push::{ChannelSignal, PushChannel, PushEvent},
    reconciler::ChannelState,
    session::{NotificationSession, SyncSettings},
    source::NotificationSource,
    test_helpers::{FakeChannel, FakeSource, SourceOp, eventually},
};

/// Grace period for a task to finish applying what it fetched.
const SETTLE: Duration = Duration::from_millis(20);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Running session plus handles on its fakes and a toast log.
pub struct SessionRig {
    /// Server side.
    pub source: Arc<FakeSource>,
    /// Push side.
    pub channel: Arc<FakeChannel>,
    /// Session under test.
    pub session: NotificationSession,
    toasts: Arc<Mutex<Vec<NotificationId>>>,
}

impl SessionRig {
    /// Start a session whose server holds `records`.
    #[must_use]
    pub async fn start(records: Vec<NotificationRecord>, settings: SyncSettings) -> Self {
        let source = Arc::new(FakeSource::with_records(records));
        let channel = Arc::new(FakeChannel::default());
        let toasts = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&toasts);
        let session = NotificationSession::builder(
            Arc::clone(&source) as Arc<dyn NotificationSource>,
            Arc::clone(&channel) as Arc<dyn PushChannel>,
        )
        .settings(settings)
        .toast(move |record| lock(&sink).push(record.id.clone()))
        .start()
        .await;
        Self {
            source,
            channel,
            session,
            toasts,
        }
    }

    /// Bring the push channel up and wait for the reconciler to follow and
    /// for the catch-up poll to land.
    #[must_use]
    pub async fn go_live(&self) -> bool {
        let fetches = self.source.count(SourceOp::Fetch);
        let live = self.channel.go_live().await
            && self.wait_for_state(ChannelState::Connected).await
            && eventually(|| self.source.count(SourceOp::Fetch) > fetches).await;
        tokio::time::sleep(SETTLE).await;
        live
    }

    /// Drop the push channel and wait for the reconciler to follow.
    #[must_use]
    pub async fn go_offline(&self) -> bool {
        self.channel.drop_connection().await
            && self.wait_for_state(ChannelState::Disconnected).await
    }

    /// Wait until the reconciler reports `state`.
    #[must_use]
    pub async fn wait_for_state(&self, state: ChannelState) -> bool {
        eventually(|| self.session.channel_state() == state).await
    }

    /// Push `event` and wait until the projection reflects `applied`.
    #[must_use]
    pub async fn push(&self, event: PushEvent, applied: impl Fn(&Self) -> bool) -> bool {
        self.channel.emit(ChannelSignal::Event(event)).await && eventually(|| applied(self)).await
    }

    /// Projection record ids, newest first.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.session
            .snapshot()
            .records()
            .iter()
            .map(|record| record.id.to_string())
            .collect()
    }

    /// Ids surfaced through the toast sink so far.
    #[must_use]
    pub fn toasts(&self) -> Vec<NotificationId> { lock(&self.toasts).clone() }
}

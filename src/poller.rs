//! Poll fallback.
//!
//! While the push channel is not connected, re-fetch the first page on a
//! fixed interval and merge it into the projection. Each transition into
//! `Connected` also triggers one catch-up tick, since the reconciler drops
//! events that arrive before it is connected. Polling is best-effort: tick
//! failures are logged and left for the next tick.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    projection::ProjectionStore,
    reconciler::ChannelState,
    session::RacePolicy,
    source::NotificationSource,
};

/// Shortest accepted poll period.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Longest accepted poll period; larger values are clamped to it.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// What a poll tick did to the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The newest record changed; the projection was replaced by the page.
    Replaced,
    /// Same newest record; only the unread counter was corrected.
    CountCorrected,
    /// An optimistic mutation was in flight and the policy defers polling.
    Deferred,
    /// The fetch failed; nothing changed.
    Failed,
}

/// Periodic first-page refresh used when the push channel is unavailable.
pub struct PollFallback {
    store: Arc<ProjectionStore>,
    source: Arc<dyn NotificationSource>,
    page_size: u32,
    interval: Duration,
    policy: RacePolicy,
}

impl PollFallback {
    /// Create a poller. `interval` is clamped to
    /// [`MIN_POLL_INTERVAL`]..=[`MAX_POLL_INTERVAL`].
    #[must_use]
    pub fn new(
        store: Arc<ProjectionStore>,
        source: Arc<dyn NotificationSource>,
        page_size: u32,
        interval: Duration,
        policy: RacePolicy,
    ) -> Self {
        Self {
            store,
            source,
            page_size,
            interval: interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL),
            policy,
        }
    }

    /// Fetch the first page once and merge it.
    pub async fn tick(&self) -> PollOutcome {
        if self.policy == RacePolicy::DeferWhileMutating && self.store.pending_mutations() > 0 {
            debug!("optimistic mutation in flight; deferring poll");
            return PollOutcome::Deferred;
        }
        let page = match self.source.fetch_page(self.page_size, 0).await {
            Ok(page) => page,
            Err(error) => {
                warn!(%error, "notification poll failed");
                return PollOutcome::Failed;
            }
        };
        let current = self.store.snapshot();
        if page.newest_id() == current.newest_id() {
            self.store.set_unread_count(page.unread_count);
            return PollOutcome::CountCorrected;
        }
        let has_more = page.is_full(self.page_size);
        debug!(
            fetched = page.notifications.len(),
            unread_count = page.unread_count,
            "poll found unseen notifications"
        );
        self.store
            .replace_all(page.notifications, page.unread_count, has_more);
        PollOutcome::Replaced
    }

    /// Poll until `cancel` fires, pausing while `state` reports `Connected`.
    pub async fn run(self, mut state: watch::Receiver<ChannelState>, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *state.borrow_and_update() == ChannelState::Connected {
                        debug!("push channel connected; catching up");
                        self.tick().await;
                    }
                }
                _ = ticker.tick() => {
                    if *state.borrow() != ChannelState::Connected {
                        self.tick().await;
                    }
                }
            }
        }
        debug!("poll fallback stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    use super::*;
    use crate::{
        models::{NotificationId, NotificationPage, NotificationRecord},
        source::SourceError,
    };

    fn record(id: &str) -> NotificationRecord {
        let created = Utc
            .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp");
        NotificationRecord::new(id, id, created)
    }

    /// Serves a fixed page, or fails when none is set.
    struct StaticSource {
        page: Mutex<Option<NotificationPage>>,
    }

    impl StaticSource {
        fn serving(ids: &[&str], unread_count: u32) -> Self {
            Self {
                page: Mutex::new(Some(NotificationPage {
                    notifications: ids.iter().copied().map(record).collect(),
                    unread_count,
                })),
            }
        }

        fn failing() -> Self {
            Self {
                page: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl NotificationSource for StaticSource {
        async fn fetch_page(&self, _limit: u32, _offset: u32) -> Result<NotificationPage, SourceError> {
            self.page
                .lock()
                .expect("page lock")
                .clone()
                .ok_or_else(|| SourceError::Server {
                    status: 503,
                    message: "unavailable".to_owned(),
                })
        }

        async fn mark_as_read(&self, _id: &NotificationId) -> Result<(), SourceError> { Ok(()) }

        async fn mark_all_as_read(&self) -> Result<(), SourceError> { Ok(()) }

        async fn archive(&self, _id: &NotificationId) -> Result<(), SourceError> { Ok(()) }

        async fn delete(&self, _id: &NotificationId) -> Result<(), SourceError> { Ok(()) }
    }

    fn poller(store: &Arc<ProjectionStore>, source: StaticSource, policy: RacePolicy) -> PollFallback {
        PollFallback::new(
            Arc::clone(store),
            Arc::new(source),
            3,
            Duration::from_secs(60),
            policy,
        )
    }

    fn seeded_store() -> Arc<ProjectionStore> {
        let store = Arc::new(ProjectionStore::new());
        store.replace_all(vec![record("a"), record("b"), record("c")], 3, true);
        store
    }

    #[rstest]
    #[tokio::test]
    async fn same_newest_only_corrects_count() {
        let store = seeded_store();
        let before = store.snapshot();
        let poller = poller(
            &store,
            StaticSource::serving(&["a", "b", "c"], 2),
            RacePolicy::LastWriteWins,
        );

        let outcome = poller.tick().await;

        let after = store.snapshot();
        assert_eq!(outcome, PollOutcome::CountCorrected);
        assert_eq!(after.records(), before.records());
        assert_eq!(after.unread_count(), 2);
        assert!(after.has_more_pages());
    }

    #[rstest]
    #[tokio::test]
    async fn unseen_newest_replaces_projection() {
        let store = seeded_store();
        let poller = poller(
            &store,
            StaticSource::serving(&["d", "a", "b"], 4),
            RacePolicy::LastWriteWins,
        );

        let outcome = poller.tick().await;

        let state = store.snapshot();
        let ids: Vec<_> = state.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(outcome, PollOutcome::Replaced);
        assert_eq!(ids, ["d", "a", "b"]);
        assert_eq!(state.unread_count(), 4);
        assert!(state.has_more_pages());
    }

    #[rstest]
    #[tokio::test]
    async fn failure_is_swallowed() {
        let store = seeded_store();
        let before = store.snapshot();
        let poller = poller(&store, StaticSource::failing(), RacePolicy::LastWriteWins);

        let outcome = poller.tick().await;

        assert_eq!(outcome, PollOutcome::Failed);
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
        assert!(store.snapshot().last_error().is_none());
    }

    #[rstest]
    #[case(RacePolicy::LastWriteWins, PollOutcome::Replaced)]
    #[case(RacePolicy::DeferWhileMutating, PollOutcome::Deferred)]
    #[tokio::test]
    async fn policy_decides_ticks_during_mutation(
        #[case] policy: RacePolicy,
        #[case] expected: PollOutcome,
    ) {
        let store = seeded_store();
        let poller = poller(&store, StaticSource::serving(&["z"], 1), policy);
        let _pending = store.begin_mutation();

        assert_eq!(poller.tick().await, expected);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn polls_only_while_disconnected() {
        let store = Arc::new(ProjectionStore::new());
        let poller = poller(
            &store,
            StaticSource::serving(&["a"], 1),
            RacePolicy::LastWriteWins,
        );
        let (state_tx, state_rx) = watch::channel(ChannelState::Connected);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poller.run(state_rx, cancel.clone()));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(store.snapshot().records().is_empty());

        state_tx.send_replace(ChannelState::Disconnected);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.snapshot().unread_count(), 1);

        cancel.cancel();
        task.await.expect("poller task");
    }

    #[rstest]
    #[case(Duration::MAX, MAX_POLL_INTERVAL)]
    #[case(Duration::ZERO, MIN_POLL_INTERVAL)]
    #[case(Duration::from_secs(30), Duration::from_secs(30))]
    #[tokio::test(start_paused = true)]
    async fn out_of_range_interval_is_clamped(
        #[case] requested: Duration,
        #[case] used: Duration,
    ) {
        let store = seeded_store();
        let poller = PollFallback::new(
            Arc::clone(&store),
            Arc::new(StaticSource::serving(&["a"], 1)),
            3,
            requested,
            RacePolicy::LastWriteWins,
        );
        assert_eq!(poller.interval, used);
        let (_state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poller.run(state_rx, cancel.clone()));

        tokio::time::sleep(Duration::from_millis(5)).await;
        cancel.cancel();

        task.await.expect("poller survives the configured interval");
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn connecting_triggers_catch_up_tick() {
        let store = Arc::new(ProjectionStore::new());
        let poller = poller(
            &store,
            StaticSource::serving(&["a", "b"], 2),
            RacePolicy::LastWriteWins,
        );
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poller.run(state_rx, cancel.clone()));

        state_tx.send_replace(ChannelState::Connected);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(store.snapshot().records().len(), 2);
        cancel.cancel();
        task.await.expect("poller task");
    }
}

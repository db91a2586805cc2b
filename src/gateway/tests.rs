//! Tests for optimistic mutations, routing and rollback.

use rstest::{fixture, rstest};
use tokio::sync::mpsc;

use super::*;
use crate::{
    models::NotificationRecord,
    push::{ChannelSignal, OutboundMessage},
    test_helpers::{FakeChannel, FakeSource, SourceCall, SourceOp, eventually, read_record, records},
};

struct Harness {
    store: Arc<ProjectionStore>,
    source: Arc<FakeSource>,
    channel: Arc<FakeChannel>,
    reconciler: Arc<StreamReconciler>,
    gateway: Arc<MutationGateway>,
}

impl Harness {
    /// Bring the fake channel up and feed its signals to the reconciler.
    async fn go_live(&self) {
        let (tx, mut rx) = mpsc::channel(8);
        self.channel.connect(tx).await.expect("connect");
        assert!(self.channel.go_live().await);
        while let Ok(signal) = rx.try_recv() {
            self.reconciler.handle_signal(signal);
        }
        assert!(self.reconciler.is_connected());
    }

    fn ids(&self) -> Vec<String> {
        self.store
            .snapshot()
            .records()
            .iter()
            .map(|record| record.id.to_string())
            .collect()
    }

    fn is_read(&self, id: &str) -> bool {
        self.store
            .snapshot()
            .find(&NotificationId::from(id))
            .is_some_and(NotificationRecord::is_read)
    }
}

/// Local and server both hold unread `[a, b, c]`.
#[fixture]
fn harness() -> Harness {
    let store = Arc::new(ProjectionStore::new());
    store.replace_all(records(&["a", "b", "c"]), 3, false);
    let source = Arc::new(FakeSource::with_records(records(&["a", "b", "c"])));
    let channel = Arc::new(FakeChannel::default());
    let reconciler = Arc::new(StreamReconciler::new(Arc::clone(&store), None));
    let gateway = Arc::new(MutationGateway::new(
        Arc::clone(&store),
        Arc::clone(&source) as Arc<dyn NotificationSource>,
        Arc::clone(&channel) as Arc<dyn PushChannel>,
        Arc::clone(&reconciler),
        50,
    ));
    Harness {
        store,
        source,
        channel,
        reconciler,
        gateway,
    }
}

fn b() -> NotificationId { NotificationId::from("b") }

#[rstest]
#[tokio::test]
async fn change_is_visible_before_confirmation(harness: Harness) {
    let gate = harness.source.hold_confirmations();
    let gateway = Arc::clone(&harness.gateway);
    let task = tokio::spawn(async move { gateway.mark_as_read(&b()).await });

    assert!(eventually(|| harness.is_read("b")).await);
    assert_eq!(harness.store.snapshot().unread_count(), 2);
    assert_eq!(harness.store.pending_mutations(), 1);

    gate.add_permits(1);
    task.await.expect("join").expect("confirmed");

    assert_eq!(harness.store.pending_mutations(), 0);
    assert!(harness.is_read("b"));
}

#[rstest]
#[tokio::test]
async fn marking_a_read_record_sends_nothing(harness: Harness) {
    harness
        .store
        .replace_all(vec![read_record("a"), read_record("b")], 0, false);
    let before = harness.store.snapshot();

    harness.gateway.mark_as_read(&b()).await.expect("no-op");

    assert!(harness.source.calls().is_empty());
    assert!(harness.channel.sent().is_empty());
    assert!(Arc::ptr_eq(&before, &harness.store.snapshot()));
}

#[rstest]
#[tokio::test]
async fn reads_use_rest_while_disconnected(harness: Harness) {
    harness.gateway.mark_as_read(&b()).await.expect("mark read");
    harness.gateway.mark_all_as_read().await.expect("mark all");

    assert_eq!(
        harness.source.calls(),
        [SourceCall::MarkAsRead(b()), SourceCall::MarkAllAsRead]
    );
    assert!(harness.channel.sent().is_empty());
}

#[rstest]
#[tokio::test]
async fn reads_use_push_channel_while_connected(harness: Harness) {
    harness.go_live().await;

    harness.gateway.mark_as_read(&b()).await.expect("mark read");
    harness.gateway.mark_all_as_read().await.expect("mark all");

    assert_eq!(
        harness.channel.sent(),
        [
            OutboundMessage::MarkAsRead {
                notification_id: b()
            },
            OutboundMessage::MarkAllAsRead,
        ]
    );
    assert!(harness.source.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn reconciler_state_gates_channel_route(harness: Harness) {
    harness.go_live().await;
    harness.reconciler.handle_signal(ChannelSignal::Disconnected);

    harness.gateway.mark_as_read(&b()).await.expect("mark read");

    assert_eq!(harness.source.calls(), [SourceCall::MarkAsRead(b())]);
    assert!(harness.channel.sent().is_empty());
}

#[rstest]
#[tokio::test]
async fn archive_and_delete_always_use_rest(harness: Harness) {
    harness.go_live().await;

    harness.gateway.archive(&b()).await.expect("archive");
    harness
        .gateway
        .delete(&NotificationId::from("c"))
        .await
        .expect("delete");

    assert_eq!(
        harness.source.calls(),
        [
            SourceCall::Archive(b()),
            SourceCall::Delete(NotificationId::from("c")),
        ]
    );
    assert!(harness.channel.sent().is_empty());
}

#[rstest]
#[tokio::test]
async fn mark_all_zeroes_counter(harness: Harness) {
    harness.gateway.mark_all_as_read().await.expect("mark all");

    let state = harness.store.snapshot();
    assert_eq!(state.unread_count(), 0);
    assert!(state.records().iter().all(NotificationRecord::is_read));
}

#[rstest]
#[case::archive(MutationKind::Archive)]
#[case::delete(MutationKind::Delete)]
#[tokio::test]
async fn removal_drops_record_and_unread_count(harness: Harness, #[case] kind: MutationKind) {
    let result = match kind {
        MutationKind::Archive => harness.gateway.archive(&b()).await,
        _ => harness.gateway.delete(&b()).await,
    };

    result.expect("removed");
    assert_eq!(harness.ids(), ["a", "c"]);
    assert_eq!(harness.store.snapshot().unread_count(), 2);
    assert_eq!(harness.source.server_records().len(), 2);
}

#[rstest]
#[tokio::test]
async fn failed_confirmation_rolls_back_from_server(harness: Harness) {
    harness.source.fail(SourceOp::MarkAsRead);

    let err = harness
        .gateway
        .mark_as_read(&b())
        .await
        .expect_err("confirmation fails");

    assert!(matches!(
        err,
        MutationError::Source {
            kind: MutationKind::MarkAsRead,
            source: SourceError::Server { status: 503, .. },
        }
    ));
    assert!(!harness.is_read("b"));
    let state = harness.store.snapshot();
    assert_eq!(state.unread_count(), 3);
    assert_eq!(harness.source.count(SourceOp::Fetch), 1);
    let fault = state.last_error().expect("fault recorded");
    assert_eq!(fault.origin, FaultOrigin::Mutation(MutationKind::MarkAsRead));
    assert_eq!(fault.message, err.to_string());
}

#[rstest]
#[tokio::test]
async fn failed_refetch_restores_snapshot(harness: Harness) {
    harness.source.fail(SourceOp::Archive);
    harness.source.fail(SourceOp::Fetch);

    let err = harness
        .gateway
        .archive(&b())
        .await
        .expect_err("archive fails");

    assert_eq!(err.kind(), Some(MutationKind::Archive));
    assert_eq!(harness.ids(), ["a", "b", "c"]);
    let state = harness.store.snapshot();
    assert_eq!(state.unread_count(), 3);
    assert_eq!(
        state.last_error().map(|fault| fault.origin),
        Some(FaultOrigin::Mutation(MutationKind::Archive))
    );
}

#[rstest]
#[tokio::test]
async fn channel_send_failure_rolls_back(harness: Harness) {
    harness.go_live().await;
    harness.channel.fail_sends(true);

    let err = harness
        .gateway
        .mark_all_as_read()
        .await
        .expect_err("send fails");

    assert!(matches!(
        err,
        MutationError::Channel {
            kind: MutationKind::MarkAllAsRead,
            ..
        }
    ));
    let state = harness.store.snapshot();
    assert_eq!(state.unread_count(), 3);
    assert!(state.records().iter().all(|record| !record.is_read()));
}

#[rstest]
#[tokio::test]
async fn closed_store_rejects_mutations(harness: Harness) {
    harness.store.close();

    let err = harness
        .gateway
        .delete(&b())
        .await
        .expect_err("session closed");

    assert!(matches!(err, MutationError::SessionClosed));
    assert_eq!(err.kind(), None);
    assert!(harness.source.calls().is_empty());
}

#![allow(
    unfulfilled_lint_expectations,
    reason = "test lint expectations may not all trigger"
)]
#![expect(missing_docs, reason = "test file")]
#![expect(clippy::expect_used, reason = "test assertions")]

//! Behavioural tests for optimistic mutations and their rollback.

use std::cell::{OnceCell, RefCell};

use notiflow::{
    gateway::MutationError,
    models::NotificationId,
    push::OutboundMessage,
    session::SyncSettings,
};
use rstest::fixture;
use rstest_bdd::assert_step_ok;
use rstest_bdd_macros::{given, scenario, then, when};
use test_util::{SessionRig, SourceOp, records};
use tokio::runtime::Runtime;

struct MutationWorld {
    rig: OnceCell<SessionRig>,
    result: RefCell<Option<Result<(), MutationError>>>,
    rt: Runtime,
}

impl MutationWorld {
    fn new() -> Self {
        Self {
            rig: OnceCell::new(),
            result: RefCell::new(None),
            rt: Runtime::new().expect("runtime"),
        }
    }

    fn rig(&self) -> &SessionRig { self.rig.get().expect("session started") }

    fn record_result(&self, result: Result<(), MutationError>) { self.result.replace(Some(result)); }
}

fn split_ids(list: &str) -> Vec<&str> { list.split(',').map(str::trim).collect() }

#[fixture]
fn world() -> MutationWorld {
    let world = MutationWorld::new();
    debug_assert!(world.rig.get().is_none(), "world starts without a session");
    world
}

#[given("a session holding notifications \"{ids}\"")]
fn given_session(world: &MutationWorld, ids: String) {
    let rig = world
        .rt
        .block_on(SessionRig::start(records(&split_ids(&ids)), SyncSettings::default()));
    assert!(world.rig.set(rig).is_ok(), "session started once");
}

#[given("the server rejects read confirmations")]
fn given_rejecting_server(world: &MutationWorld) { world.rig().source.fail(SourceOp::MarkAsRead); }

#[given("the push channel is live")]
fn given_live_channel(world: &MutationWorld) {
    assert!(world.rt.block_on(world.rig().go_live()), "channel comes up");
}

#[when("I archive \"{id}\"")]
fn when_archive(world: &MutationWorld, id: String) {
    let rig = world.rig();
    let result = world
        .rt
        .block_on(rig.session.archive(&NotificationId::from(id)));
    world.record_result(result);
}

#[when("I mark \"{id}\" as read")]
fn when_mark_read(world: &MutationWorld, id: String) {
    let rig = world.rig();
    let result = world
        .rt
        .block_on(rig.session.mark_as_read(&NotificationId::from(id)));
    world.record_result(result);
}

#[when("I mark all notifications as read")]
fn when_mark_all(world: &MutationWorld) {
    let rig = world.rig();
    let result = world.rt.block_on(rig.session.mark_all_as_read());
    world.record_result(result);
}

#[then("the mutation succeeds")]
fn then_succeeds(world: &MutationWorld) {
    let result = world.result.borrow();
    let Some(outcome) = result.as_ref() else {
        panic!("no mutation result recorded");
    };
    assert_step_ok!(outcome.as_ref().map_err(ToString::to_string));
}

#[then("the mutation fails")]
fn then_fails(world: &MutationWorld) {
    let result = world.result.borrow();
    assert!(
        matches!(result.as_ref(), Some(Err(MutationError::Source { .. }))),
        "expected a source failure, got {result:?}"
    );
}

#[then("the projection lists \"{ids}\"")]
fn then_lists(world: &MutationWorld, ids: String) { assert_eq!(world.rig().ids(), split_ids(&ids)); }

#[then("the unread count is {count}")]
fn then_unread_count(world: &MutationWorld, count: u32) {
    assert_eq!(world.rig().session.snapshot().unread_count(), count);
}

#[then("\"{id}\" is unread")]
fn then_unread(world: &MutationWorld, id: String) {
    let state = world.rig().session.snapshot();
    let record = state
        .find(&NotificationId::from(id))
        .expect("record present");
    assert!(!record.is_read());
    assert!(record.read_at().is_none());
}

#[then("the push channel carried a mark-all request")]
fn then_channel_carried_mark_all(world: &MutationWorld) {
    assert_eq!(world.rig().channel.sent(), [OutboundMessage::MarkAllAsRead]);
    assert!(world.rig().source.calls().iter().all(|call| {
        !matches!(call, test_util::SourceCall::MarkAllAsRead)
    }));
}

#[scenario(path = "tests/features/optimistic_mutations.feature", index = 0)]
fn archive_removes_notification(world: MutationWorld) { let _ = world; }

#[scenario(path = "tests/features/optimistic_mutations.feature", index = 1)]
fn rejected_read_is_rolled_back(world: MutationWorld) { let _ = world; }

#[scenario(path = "tests/features/optimistic_mutations.feature", index = 2)]
fn mark_all_over_live_channel(world: MutationWorld) { let _ = world; }

//! Local projection store.
//!
//! The store holds the client-side copy of the user's notifications plus a
//! derived unread counter. It never performs I/O: the stream reconciler, the
//! poll fallback and the mutation gateway feed it, and everything else reads
//! snapshots or subscribes to changes.
//!
//! Snapshots are `Arc<ProjectionState>`. Every mutation primitive swaps in a
//! new snapshot under a short lock, returns the previous one (so the gateway
//! can roll back), and then notifies observers outside the lock.

use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::{
    gateway::MutationKind,
    models::{NotificationId, NotificationRecord},
};

/// Where a recorded [`SyncFault`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOrigin {
    /// A user-requested full refresh.
    Refresh,
    /// Fetching a further page.
    LoadMore,
    /// A mutation the server did not confirm.
    Mutation(MutationKind),
}

/// Error descriptor kept on the projection for the UI to display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFault {
    /// Operation that failed.
    pub origin: FaultOrigin,
    /// Human-readable failure description.
    pub message: String,
}

impl SyncFault {
    /// Build a fault from any displayable error.
    #[must_use]
    pub fn new(origin: FaultOrigin, error: &impl std::fmt::Display) -> Self {
        Self {
            origin,
            message: error.to_string(),
        }
    }
}

/// Aggregate view of the user's notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionState {
    records: Vec<NotificationRecord>,
    unread_count: u32,
    is_loading: bool,
    last_error: Option<SyncFault>,
    has_more_pages: bool,
}

impl ProjectionState {
    /// Records in display order, newest first.
    #[must_use]
    pub fn records(&self) -> &[NotificationRecord] { &self.records }

    /// Unread counter; may briefly diverge from the records while an
    /// optimistic mutation is pending.
    #[must_use]
    pub const fn unread_count(&self) -> u32 { self.unread_count }

    /// Whether a user-visible fetch is in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool { self.is_loading }

    /// Most recent user-visible failure.
    #[must_use]
    pub const fn last_error(&self) -> Option<&SyncFault> { self.last_error.as_ref() }

    /// Whether the server has further pages beyond the loaded records.
    #[must_use]
    pub const fn has_more_pages(&self) -> bool { self.has_more_pages }

    /// Identifier of the newest record.
    #[must_use]
    pub fn newest_id(&self) -> Option<&NotificationId> {
        self.records.first().map(|record| &record.id)
    }

    /// Look up a record by identifier.
    #[must_use]
    pub fn find(&self, id: &NotificationId) -> Option<&NotificationRecord> {
        self.records.iter().find(|record| &record.id == id)
    }

    /// Iterate over unread records in display order.
    pub fn unread(&self) -> impl Iterator<Item = &NotificationRecord> {
        self.records.iter().filter(|record| !record.is_read())
    }

    /// Whether the counter agrees with the loaded records.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        usize::try_from(self.unread_count).is_ok_and(|count| count == self.unread().count())
    }

    fn position(&self, id: &NotificationId) -> Option<usize> {
        self.records.iter().position(|record| &record.id == id)
    }

    fn take_record(&mut self, id: &NotificationId) -> Option<NotificationRecord> {
        let index = self.position(id)?;
        let removed = self.records.remove(index);
        if !removed.is_read() {
            self.unread_count = self.unread_count.saturating_sub(1);
        }
        Some(removed)
    }
}

/// Identifier returned by [`ProjectionStore::on_projection_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Callback invoked with the new snapshot after every effective mutation.
pub type ChangeHandler = Arc<dyn Fn(&Arc<ProjectionState>) + Send + Sync>;

struct Observer {
    id: SubscriptionId,
    handler: ChangeHandler,
}

/// Shared owner of the [`ProjectionState`].
///
/// Mutation primitives are crate-private: only the reconciler, the poll
/// fallback, the mutation gateway and the session drive them.
pub struct ProjectionStore {
    state: Mutex<Arc<ProjectionState>>,
    /// Held from the state swap until observers return, so deliveries
    /// follow swap order. Always taken before `state`.
    delivery: Mutex<()>,
    observers: Mutex<Vec<Observer>>,
    next_id: AtomicU64,
    pending_mutations: AtomicUsize,
    closed: AtomicBool,
}

impl Default for ProjectionStore {
    fn default() -> Self { Self::new() }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ProjectionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Arc::new(ProjectionState::default())),
            delivery: Mutex::new(()),
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            pending_mutations: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ProjectionState> { Arc::clone(&lock(&self.state)) }

    /// Register a change handler.
    ///
    /// Handlers run one at a time, in the order the changes were made, and
    /// each sees the snapshot that is current while it runs. A handler may
    /// read [`Self::snapshot`] but must not drive another mutation
    /// synchronously.
    pub fn on_projection_changed<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Arc<ProjectionState>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.observers).push(Observer {
            id,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a change handler. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = lock(&self.observers);
        let before = observers.len();
        observers.retain(|observer| observer.id != id);
        observers.len() != before
    }

    /// Whether the owning session has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::Acquire) }

    /// Number of optimistic mutations awaiting confirmation.
    #[must_use]
    pub fn pending_mutations(&self) -> usize { self.pending_mutations.load(Ordering::Acquire) }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        lock(&self.observers).clear();
    }

    pub(crate) fn begin_mutation(&self) -> PendingMutation<'_> {
        self.pending_mutations.fetch_add(1, Ordering::AcqRel);
        PendingMutation { store: self }
    }

    /// Apply `change` to a copy of the current state.
    ///
    /// `change` returns whether it altered anything; observers only fire when
    /// it did. The previous snapshot is returned either way.
    fn mutate<F>(&self, change: F) -> Arc<ProjectionState>
    where
        F: FnOnce(&mut ProjectionState) -> bool,
    {
        if self.is_closed() {
            trace!("projection closed; dropping mutation");
            return self.snapshot();
        }
        let _delivery = lock(&self.delivery);
        let (previous, next) = {
            let mut guard = lock(&self.state);
            let mut draft = ProjectionState::clone(&guard);
            if !change(&mut draft) {
                return Arc::clone(&guard);
            }
            let next = Arc::new(draft);
            let previous = std::mem::replace(&mut *guard, Arc::clone(&next));
            (previous, next)
        };
        self.notify(&next);
        previous
    }

    fn notify(&self, snapshot: &Arc<ProjectionState>) {
        let handlers: Vec<ChangeHandler> = lock(&self.observers)
            .iter()
            .map(|observer| Arc::clone(&observer.handler))
            .collect();
        for handler in handlers {
            handler(snapshot);
        }
    }

    pub(crate) fn replace_all(
        &self,
        records: Vec<NotificationRecord>,
        unread_count: u32,
        has_more_pages: bool,
    ) -> Arc<ProjectionState> {
        self.mutate(|state| {
            *state = ProjectionState {
                records,
                unread_count,
                is_loading: false,
                last_error: None,
                has_more_pages,
            };
            true
        })
    }

    pub(crate) fn append_page(
        &self,
        records: Vec<NotificationRecord>,
        has_more_pages: bool,
    ) -> Arc<ProjectionState> {
        self.mutate(|state| {
            for record in records {
                if state.position(&record.id).is_none() {
                    state.records.push(record);
                }
            }
            state.has_more_pages = has_more_pages;
            state.is_loading = false;
            true
        })
    }

    pub(crate) fn prepend(&self, record: NotificationRecord) -> Arc<ProjectionState> {
        self.mutate(|state| {
            state.take_record(&record.id);
            if !record.is_read() {
                state.unread_count = state.unread_count.saturating_add(1);
            }
            state.records.insert(0, record);
            true
        })
    }

    pub(crate) fn patch_read_status(
        &self,
        id: &NotificationId,
        is_read: bool,
        at: DateTime<Utc>,
    ) -> Arc<ProjectionState> {
        self.mutate(|state| {
            let Some(record) = state.records.iter_mut().find(|record| &record.id == id) else {
                return false;
            };
            if is_read {
                if !record.mark_read(at) {
                    return false;
                }
                state.unread_count = state.unread_count.saturating_sub(1);
            } else {
                if !record.mark_unread() {
                    return false;
                }
                state.unread_count = state.unread_count.saturating_add(1);
            }
            true
        })
    }

    pub(crate) fn mark_all_read(&self, at: DateTime<Utc>) -> Arc<ProjectionState> {
        self.mutate(|state| {
            let mut changed = state.unread_count != 0;
            for record in &mut state.records {
                changed |= record.mark_read(at);
            }
            state.unread_count = 0;
            changed
        })
    }

    pub(crate) fn remove(&self, id: &NotificationId) -> Arc<ProjectionState> {
        self.mutate(|state| state.take_record(id).is_some())
    }

    pub(crate) fn set_unread_count(&self, count: u32) -> Arc<ProjectionState> {
        self.mutate(|state| {
            if state.unread_count == count {
                return false;
            }
            state.unread_count = count;
            true
        })
    }

    pub(crate) fn set_loading(&self, is_loading: bool) -> Arc<ProjectionState> {
        self.mutate(|state| {
            if state.is_loading == is_loading {
                return false;
            }
            state.is_loading = is_loading;
            true
        })
    }

    pub(crate) fn set_fault(&self, fault: Option<SyncFault>) -> Arc<ProjectionState> {
        self.mutate(|state| {
            state.is_loading = false;
            state.last_error = fault;
            true
        })
    }

    pub(crate) fn restore(&self, snapshot: &ProjectionState) -> Arc<ProjectionState> {
        self.mutate(|state| {
            state.records = snapshot.records.clone();
            state.unread_count = snapshot.unread_count;
            state.has_more_pages = snapshot.has_more_pages;
            true
        })
    }
}

/// Guard counting an optimistic mutation as in flight until dropped.
pub(crate) struct PendingMutation<'a> {
    store: &'a ProjectionStore,
}

impl Drop for PendingMutation<'_> {
    fn drop(&mut self) { self.store.pending_mutations.fetch_sub(1, Ordering::AcqRel); }
}

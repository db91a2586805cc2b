//! In-memory collaborators for session tests.
//!
//! [`FakeSource`] plays the notification server and [`FakeChannel`] plays the
//! push connection, so unit and behaviour suites can drive the whole sync
//! pipeline without sockets. Both record what was asked of them and accept
//! injected failures.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::{
    models::{NotificationId, NotificationPage, NotificationRecord},
    push::{ChannelError, ChannelSignal, OutboundMessage, PushChannel, SignalSender},
    source::{NotificationSource, SourceError},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Creation time shared by every fixture record.
#[must_use]
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Unread record titled after its id.
#[must_use]
pub fn record(id: &str) -> NotificationRecord { NotificationRecord::new(id, id, fixed_time()) }

/// Read record titled after its id.
#[must_use]
pub fn read_record(id: &str) -> NotificationRecord { record(id).read(fixed_time()) }

/// Unread records for `ids`, in order.
#[must_use]
pub fn records(ids: &[&str]) -> Vec<NotificationRecord> { ids.iter().copied().map(record).collect() }

/// Poll `check` until it holds or two seconds pass.
#[must_use]
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Source operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceOp {
    /// [`NotificationSource::fetch_page`].
    Fetch,
    /// [`NotificationSource::mark_as_read`].
    MarkAsRead,
    /// [`NotificationSource::mark_all_as_read`].
    MarkAllAsRead,
    /// [`NotificationSource::archive`].
    Archive,
    /// [`NotificationSource::delete`].
    Delete,
}

/// One request received by a [`FakeSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCall {
    /// Page fetch.
    Fetch {
        /// Requested page size.
        limit: u32,
        /// Requested offset.
        offset: u32,
    },
    /// Single read confirmation.
    MarkAsRead(NotificationId),
    /// Bulk read confirmation.
    MarkAllAsRead,
    /// Archive request.
    Archive(NotificationId),
    /// Delete request.
    Delete(NotificationId),
}

impl SourceCall {
    const fn op(&self) -> SourceOp {
        match self {
            Self::Fetch { .. } => SourceOp::Fetch,
            Self::MarkAsRead(_) => SourceOp::MarkAsRead,
            Self::MarkAllAsRead => SourceOp::MarkAllAsRead,
            Self::Archive(_) => SourceOp::Archive,
            Self::Delete(_) => SourceOp::Delete,
        }
    }
}

/// In-memory notification server.
///
/// Mutations change the server-side list so a later fetch reflects them,
/// which is what the gateway's rollback refresh relies on.
#[derive(Default)]
pub struct FakeSource {
    records: Mutex<Vec<NotificationRecord>>,
    failing: Mutex<HashSet<SourceOp>>,
    calls: Mutex<Vec<SourceCall>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeSource {
    /// Server holding `records`, newest first.
    #[must_use]
    pub fn with_records(records: Vec<NotificationRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Make `op` answer with HTTP 503 until [`FakeSource::recover`].
    pub fn fail(&self, op: SourceOp) { lock(&self.failing).insert(op); }

    /// Let `op` succeed again.
    pub fn recover(&self, op: SourceOp) { lock(&self.failing).remove(&op); }

    /// Add a record at the head of the server list.
    pub fn push_record(&self, record: NotificationRecord) { lock(&self.records).insert(0, record); }

    /// Server-side list.
    #[must_use]
    pub fn server_records(&self) -> Vec<NotificationRecord> { lock(&self.records).clone() }

    /// Requests received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<SourceCall> { lock(&self.calls).clone() }

    /// Number of requests of kind `op` received so far.
    #[must_use]
    pub fn count(&self, op: SourceOp) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.op() == op)
            .count()
    }

    /// Hold every mutation confirmation until permits are released on the
    /// returned semaphore.
    #[must_use]
    pub fn hold_confirmations(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *lock(&self.gate) = Some(Arc::clone(&gate));
        gate
    }

    async fn begin(&self, call: SourceCall) -> Result<(), SourceError> {
        let op = call.op();
        lock(&self.calls).push(call);
        if op != SourceOp::Fetch {
            let gate = lock(&self.gate).clone();
            if let Some(gate) = gate {
                gate.acquire().await.map(SemaphorePermit::forget).map_err(|_| {
                    SourceError::Server {
                        status: 499,
                        message: "confirmation gate closed".to_owned(),
                    }
                })?;
            }
        }
        if lock(&self.failing).contains(&op) {
            return Err(SourceError::Server {
                status: 503,
                message: format!("{op:?} unavailable"),
            });
        }
        Ok(())
    }

    fn take(&self, id: &NotificationId) -> Result<(), SourceError> {
        let mut records = lock(&self.records);
        let before = records.len();
        records.retain(|record| &record.id != id);
        if records.len() == before {
            return Err(not_found(id));
        }
        Ok(())
    }
}

fn not_found(id: &NotificationId) -> SourceError {
    SourceError::Server {
        status: 404,
        message: format!("notification {id} not found"),
    }
}

#[async_trait]
impl NotificationSource for FakeSource {
    async fn fetch_page(&self, limit: u32, offset: u32) -> Result<NotificationPage, SourceError> {
        self.begin(SourceCall::Fetch { limit, offset }).await?;
        let records = lock(&self.records);
        let unread_count = records.iter().filter(|record| !record.is_read()).count();
        let notifications = records
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(NotificationPage {
            notifications,
            unread_count: u32::try_from(unread_count).unwrap_or(u32::MAX),
        })
    }

    async fn mark_as_read(&self, id: &NotificationId) -> Result<(), SourceError> {
        self.begin(SourceCall::MarkAsRead(id.clone())).await?;
        let mut records = lock(&self.records);
        let record = records
            .iter_mut()
            .find(|record| &record.id == id)
            .ok_or_else(|| not_found(id))?;
        record.mark_read(Utc::now());
        Ok(())
    }

    async fn mark_all_as_read(&self) -> Result<(), SourceError> {
        self.begin(SourceCall::MarkAllAsRead).await?;
        let now = Utc::now();
        for record in lock(&self.records).iter_mut() {
            record.mark_read(now);
        }
        Ok(())
    }

    async fn archive(&self, id: &NotificationId) -> Result<(), SourceError> {
        self.begin(SourceCall::Archive(id.clone())).await?;
        self.take(id)
    }

    async fn delete(&self, id: &NotificationId) -> Result<(), SourceError> {
        self.begin(SourceCall::Delete(id.clone())).await?;
        self.take(id)
    }
}

/// Scripted push channel.
///
/// `connect` only stores the signal sender; tests decide when the
/// connection comes up with [`FakeChannel::go_live`].
#[derive(Default)]
pub struct FakeChannel {
    signals: Mutex<Option<SignalSender>>,
    connected: AtomicBool,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<OutboundMessage>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FakeChannel {
    /// Deliver `signal` to the session. Returns `false` when nobody listens.
    #[must_use]
    pub async fn emit(&self, signal: ChannelSignal) -> bool {
        let sender = lock(&self.signals).clone();
        match sender {
            Some(sender) => sender.send(signal).await.is_ok(),
            None => false,
        }
    }

    /// Bring the connection up and announce it.
    #[must_use]
    pub async fn go_live(&self) -> bool {
        self.connected.store(true, Ordering::Release);
        self.emit(ChannelSignal::Connecting).await && self.emit(ChannelSignal::Connected).await
    }

    /// Lose the connection and announce it.
    #[must_use]
    pub async fn drop_connection(&self) -> bool {
        self.connected.store(false, Ordering::Release);
        self.emit(ChannelSignal::Disconnected).await
    }

    /// Make every send fail with an I/O error.
    pub fn fail_sends(&self, fail: bool) { self.fail_sends.store(fail, Ordering::Release); }

    /// Messages written so far.
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundMessage> { lock(&self.sent).clone() }

    /// Number of `connect` calls.
    #[must_use]
    pub fn connects(&self) -> usize { self.connects.load(Ordering::Acquire) }

    /// Number of `disconnect` calls.
    #[must_use]
    pub fn disconnects(&self) -> usize { self.disconnects.load(Ordering::Acquire) }
}

#[async_trait]
impl PushChannel for FakeChannel {
    async fn connect(&self, signals: SignalSender) -> Result<(), ChannelError> {
        self.connects.fetch_add(1, Ordering::AcqRel);
        *lock(&self.signals) = Some(signals);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::AcqRel);
        self.connected.store(false, Ordering::Release);
        lock(&self.signals).take();
    }

    fn is_connected(&self) -> bool { self.connected.load(Ordering::Acquire) }

    async fn send(&self, message: OutboundMessage) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        if self.fail_sends.load(Ordering::Acquire) {
            return Err(ChannelError::Io(std::io::Error::other("injected send failure")));
        }
        lock(&self.sent).push(message);
        Ok(())
    }
}

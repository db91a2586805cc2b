//! Newline-delimited JSON push channel over TCP.
//!
//! One background task owns the socket. It reconnects with exponential
//! backoff until [`PushChannel::disconnect`] is called, decodes inbound frames
//! at the boundary, and writes outbound messages handed over through a queue,
//! acknowledging each write to the caller.
//!
//! A malformed inbound frame is reported as [`PushEvent::ChannelError`] and
//! the connection is dropped and re-established; frames of an unknown type
//! are skipped.

use std::{
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::{
    codec::{Framed, LinesCodec},
    sync::CancellationToken,
};
use tracing::{debug, info, warn};

use super::{
    ChannelError,
    ChannelSignal,
    OutboundMessage,
    PushChannel,
    PushEvent,
    SignalSender,
    decode_event,
};

/// Upper bound on a single inbound frame.
pub const MAX_FRAME_LEN: usize = 256 * 1024;

const OUTBOUND_QUEUE: usize = 32;

/// Reconnection delays: start at `initial`, double per failure, cap at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay after the first failure.
    pub initial: Duration,
    /// Largest delay between attempts.
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Delay following `current`.
    #[must_use]
    pub fn next(&self, current: Duration) -> Duration { current.saturating_mul(2).min(self.max) }
}

type Outbound = (OutboundMessage, oneshot::Sender<Result<(), ChannelError>>);

struct Running {
    cancel: CancellationToken,
    outbound: mpsc::Sender<Outbound>,
    task: JoinHandle<()>,
}

/// [`PushChannel`] speaking JSON lines over a TCP connection.
pub struct LinesPushChannel {
    addr: String,
    backoff: Backoff,
    connected: Arc<AtomicBool>,
    running: Mutex<Option<Running>>,
}

impl LinesPushChannel {
    /// Create a channel for `addr` (`host:port`). Nothing connects until
    /// [`PushChannel::connect`].
    #[must_use]
    pub fn new(addr: impl Into<String>, backoff: Backoff) -> Self {
        Self {
            addr: addr.into(),
            backoff,
            connected: Arc::new(AtomicBool::new(false)),
            running: Mutex::new(None),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl PushChannel for LinesPushChannel {
    async fn connect(&self, signals: SignalSender) -> Result<(), ChannelError> {
        let mut running = self.running();
        if running.as_ref().is_some_and(|run| !run.task.is_finished()) {
            return Ok(());
        }
        let cancel = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let worker = Worker {
            addr: self.addr.clone(),
            backoff: self.backoff,
            connected: Arc::clone(&self.connected),
            signals,
            outbound: outbound_rx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run());
        *running = Some(Running {
            cancel,
            outbound,
            task,
        });
        Ok(())
    }

    async fn disconnect(&self) {
        let Some(run) = self.running().take() else {
            return;
        };
        run.cancel.cancel();
        if let Err(error) = run.task.await {
            warn!(%error, "push channel task ended abnormally");
        }
        self.connected.store(false, Ordering::Release);
    }

    fn is_connected(&self) -> bool { self.connected.load(Ordering::Acquire) }

    async fn send(&self, message: OutboundMessage) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        let outbound = self
            .running()
            .as_ref()
            .map(|run| run.outbound.clone())
            .ok_or(ChannelError::NotConnected)?;
        let (ack, done) = oneshot::channel();
        outbound
            .send((message, ack))
            .await
            .map_err(|_| ChannelError::Closed)?;
        done.await.map_err(|_| ChannelError::Closed)?
    }
}

fn refuse(ack: oneshot::Sender<Result<(), ChannelError>>) {
    // The caller may have given up waiting.
    let _unheard = ack.send(Err(ChannelError::NotConnected)).is_err();
}

/// Why a connection ended.
enum Ended {
    Cancelled,
    Dropped,
}

struct Worker {
    addr: String,
    backoff: Backoff,
    connected: Arc<AtomicBool>,
    signals: SignalSender,
    outbound: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        let mut delay = self.backoff.initial;
        loop {
            if self.signals.send(ChannelSignal::Connecting).await.is_err() {
                break;
            }
            let Some(attempt) = self.dial().await else {
                break;
            };
            match attempt {
                Ok(stream) => {
                    delay = self.backoff.initial;
                    info!(addr = %self.addr, "push channel connected");
                    self.connected.store(true, Ordering::Release);
                    let ended = if self.signals.send(ChannelSignal::Connected).await.is_ok() {
                        self.pump(Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LEN)))
                            .await
                    } else {
                        Ended::Cancelled
                    };
                    self.connected.store(false, Ordering::Release);
                    self.refuse_queued();
                    let _closed = self.signals.send(ChannelSignal::Disconnected).await.is_err();
                    if matches!(ended, Ended::Cancelled) {
                        break;
                    }
                }
                Err(error) => {
                    warn!(addr = %self.addr, %error, "push channel connect failed");
                    if self.signals.send(ChannelSignal::Disconnected).await.is_err() {
                        break;
                    }
                }
            }
            debug!(?delay, "push channel reconnecting");
            if !self.idle(delay).await {
                break;
            }
            delay = self.backoff.next(delay);
        }
        self.reject_pending();
    }

    /// Open a socket, refusing outbound messages until it is up. `None` once
    /// cancelled.
    async fn dial(&mut self) -> Option<std::io::Result<TcpStream>> {
        let connect = TcpStream::connect(self.addr.as_str());
        tokio::pin!(connect);
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return None,
                attempt = &mut connect => return Some(attempt),
                Some((_, ack)) = self.outbound.recv() => refuse(ack),
            }
        }
    }

    /// Sit out the backoff `delay`, refusing outbound messages meanwhile.
    /// Returns `false` once cancelled.
    async fn idle(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                () = &mut sleep => return true,
                Some((_, ack)) = self.outbound.recv() => refuse(ack),
            }
        }
    }

    /// Answer messages queued against a connection that has just ended.
    fn refuse_queued(&mut self) {
        while let Ok((_, ack)) = self.outbound.try_recv() {
            refuse(ack);
        }
    }

    async fn pump(&mut self, mut framed: Framed<TcpStream, LinesCodec>) -> Ended {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Ended::Cancelled,
                frame = framed.next() => match frame {
                    Some(Ok(line)) => {
                        if let Some(ended) = self.inbound(&line).await {
                            return ended;
                        }
                    }
                    Some(Err(error)) => {
                        warn!(%error, "push channel read failed");
                        self.report_failure(error.to_string()).await;
                        return Ended::Dropped;
                    }
                    None => {
                        info!("push channel closed by server");
                        return Ended::Dropped;
                    }
                },
                Some((message, ack)) = self.outbound.recv() => {
                    let result = match message.encode() {
                        Ok(line) => framed.send(line).await.map_err(|error| {
                            ChannelError::Io(std::io::Error::other(error))
                        }),
                        Err(error) => Err(ChannelError::Encode(error)),
                    };
                    let failed = matches!(result, Err(ChannelError::Io(_)));
                    // The caller may have given up waiting.
                    let _unheard = ack.send(result).is_err();
                    if failed {
                        return Ended::Dropped;
                    }
                }
            }
        }
    }

    /// Forward one inbound frame; returns `Some` when the connection must end.
    async fn inbound(&self, line: &str) -> Option<Ended> {
        if line.trim().is_empty() {
            return None;
        }
        let event = match decode_event(line) {
            Ok(event) => event,
            Err(error) if error.is_ignorable() => {
                debug!(%error, "skipping push message");
                return None;
            }
            Err(error) => {
                warn!(%error, "dropping push connection after malformed frame");
                self.report_failure(error.to_string()).await;
                return Some(Ended::Dropped);
            }
        };
        if self.signals.send(ChannelSignal::Event(event)).await.is_err() {
            return Some(Ended::Cancelled);
        }
        None
    }

    async fn report_failure(&self, message: String) {
        let event = ChannelSignal::Event(PushEvent::ChannelError(message));
        if self.signals.send(event).await.is_err() {
            debug!("signal receiver gone; failure not reported");
        }
    }

    fn reject_pending(&mut self) {
        self.outbound.close();
        while let Ok((_, ack)) = self.outbound.try_recv() {
            let _unheard = ack.send(Err(ChannelError::Closed)).is_err();
        }
    }
}

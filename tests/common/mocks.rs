//! Test doubles for the pipeline seams

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dbchange_relay::events::{NotificationEvent, RawNotification};
use dbchange_relay::forwarder::{ForwardResponse, Forwarder};
use dbchange_relay::listener::NotificationSource;
use dbchange_relay::mailbox::{EventSink, Mailbox, PushOutcome};
use dbchange_relay::{RelayError, Result};

/// Notification source driven by the test
///
/// Notifications given to [`ScriptedSource::new`] are already "buffered";
/// anything sent through the [`SourceHandle`] arrives via `recv`. Once the
/// handle is dropped, `recv` waits forever.
pub struct ScriptedSource {
    buffered: VecDeque<RawNotification>,
    incoming: mpsc::UnboundedReceiver<Result<RawNotification>>,
    released: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct SourceHandle {
    tx: mpsc::UnboundedSender<Result<RawNotification>>,
    released: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new(buffered: Vec<RawNotification>) -> (Self, SourceHandle) {
        let (tx, incoming) = mpsc::unbounded_channel();
        let released = Arc::new(AtomicBool::new(false));
        let source = Self {
            buffered: buffered.into(),
            incoming,
            released: Arc::clone(&released),
        };
        (source, SourceHandle { tx, released })
    }
}

impl SourceHandle {
    pub fn notify(&self, raw: RawNotification) {
        self.tx.send(Ok(raw)).expect("source still alive");
    }

    pub fn fail(&self, error: RelayError) {
        self.tx.send(Err(error)).expect("source still alive");
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSource for ScriptedSource {
    fn next_buffered(&mut self) -> Option<RawNotification> {
        self.buffered.pop_front()
    }

    async fn recv(&mut self) -> Result<RawNotification> {
        match self.incoming.recv().await {
            Some(next) => next,
            None => std::future::pending().await,
        }
    }

    async fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Forwarder that records every body it is given, in call order
#[derive(Clone, Default)]
pub struct RecordingForwarder {
    bodies: Arc<Mutex<Vec<String>>>,
    delay: Option<Duration>,
}

impl RecordingForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every forward sleeps this long first
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn bodies(&self) -> Vec<String> {
        self.bodies.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.bodies.lock().len()
    }

    /// Per-worker factory handing every worker a clone of this recorder
    pub fn factory(&self) -> impl FnMut(usize) -> Result<RecordingForwarder> {
        let forwarder = self.clone();
        move |_worker_id| Ok(forwarder.clone())
    }

    /// Wait until at least `count` forwards were recorded
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.calls() < count && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.bodies()
    }
}

#[async_trait]
impl Forwarder for RecordingForwarder {
    async fn forward(&self, event: &NotificationEvent) -> Result<ForwardResponse> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.bodies
            .lock()
            .push(String::from_utf8_lossy(&event.payload).into_owned());
        Ok(ForwardResponse {
            status: 200,
            duration: Duration::ZERO,
        })
    }
}

/// Sink that fails the first enqueue with `ResourceExhausted`, then
/// delegates to a mailbox
pub struct FailOnceSink {
    pub mailbox: Mailbox,
    failed: AtomicBool,
    attempts: AtomicUsize,
}

impl FailOnceSink {
    pub fn new() -> Self {
        Self {
            mailbox: Mailbox::unbounded(),
            failed: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSink for FailOnceSink {
    async fn enqueue(
        &self,
        event: NotificationEvent,
        cancel: &CancellationToken,
    ) -> Result<PushOutcome> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(RelayError::resource_exhausted(format!(
                "simulated allocation failure for event {}",
                event.sequence
            )));
        }
        self.mailbox.enqueue(event, cancel).await
    }
}

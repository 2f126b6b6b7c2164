//! # Notification Poller
//!
//! Owns the database session and moves notifications into the mailbox.
//!
//! The loop alternates between two states:
//!
//! - **Draining**: take every notification the driver has already buffered,
//!   turn each into a [`NotificationEvent`] and enqueue it. Ends when the
//!   driver has nothing buffered.
//! - **Idle**: wait for the driver to deliver the next notification, or for
//!   cancellation. A delivered notification is dispatched and the poller
//!   goes back to draining.
//!
//! A notification that cannot be turned into an event or enqueued is dropped
//! and logged; draining continues with the next one. Only a failure of the
//! session itself ends the loop with an error.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{RelayError, Result};
use crate::events::{NotificationEvent, RawNotification};
use crate::listener::NotificationSource;
use crate::logging::{log_dropped_event, log_dropped_notification};
use crate::mailbox::{EventSink, PushOutcome};

/// Poller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollerState {
    /// Waiting for the driver to deliver a notification
    #[default]
    Idle,
    /// Removing buffered notifications from the driver
    Draining,
}

/// Statistics about the poller
#[derive(Debug, Clone, Default)]
pub struct PollerStats {
    pub state: PollerState,
    pub notifications_received: u64,
    pub events_enqueued: u64,
    pub events_dropped: u64,
    pub drain_cycles: u64,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
}

/// Drains a [`NotificationSource`] into an [`EventSink`]
pub struct NotificationPoller<S, K: ?Sized> {
    source: S,
    sink: Arc<K>,
    max_payload_bytes: usize,
    next_sequence: u64,
    stats: Arc<RwLock<PollerStats>>,
}

impl<S, K> NotificationPoller<S, K>
where
    S: NotificationSource,
    K: EventSink + ?Sized,
{
    pub fn new(source: S, sink: Arc<K>, max_payload_bytes: usize) -> Self {
        Self {
            source,
            sink,
            max_payload_bytes,
            next_sequence: 1,
            stats: Arc::new(RwLock::new(PollerStats::default())),
        }
    }

    /// Get poller statistics
    pub fn stats(&self) -> PollerStats {
        self.stats.read().clone()
    }

    /// Shared handle to the statistics, readable while [`run`](Self::run) is
    /// in progress
    pub fn stats_handle(&self) -> Arc<RwLock<PollerStats>> {
        Arc::clone(&self.stats)
    }

    pub fn state(&self) -> PollerState {
        self.stats.read().state
    }

    /// Give the source back, e.g. to release the database session
    pub fn into_source(self) -> S {
        self.source
    }

    /// Run until `cancel` fires (`Ok`) or the session fails (`Err`)
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        info!(
            max_payload_bytes = self.max_payload_bytes,
            "Notification poller started"
        );

        loop {
            self.drain(cancel).await?;

            if cancel.is_cancelled() {
                break;
            }

            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                received = self.source.recv() => Some(received),
            };

            match received {
                None => break,
                Some(Ok(raw)) => {
                    self.set_state(PollerState::Draining);
                    self.dispatch(raw, cancel).await?;
                }
                Some(Err(e)) => {
                    self.stats.write().last_error_at = Some(Utc::now());
                    error!(error = %e, "Database session failed, stopping poller");
                    return Err(e);
                }
            }
        }

        self.set_state(PollerState::Idle);
        let stats = self.stats();
        info!(
            notifications_received = stats.notifications_received,
            events_enqueued = stats.events_enqueued,
            events_dropped = stats.events_dropped,
            "Notification poller stopped"
        );
        Ok(())
    }

    /// One drain cycle: everything the driver has buffered, then Idle
    async fn drain(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.set_state(PollerState::Draining);
        let mut drained = 0_u64;

        while let Some(raw) = self.source.next_buffered() {
            self.dispatch(raw, cancel).await?;
            drained += 1;
        }

        {
            let mut stats = self.stats.write();
            stats.state = PollerState::Idle;
            stats.drain_cycles += 1;
        }

        if drained > 0 {
            debug!(drained = drained, "Drain cycle complete");
        }
        Ok(())
    }

    /// Build and enqueue one event. Only fatal errors are returned.
    async fn dispatch(&mut self, raw: RawNotification, cancel: &CancellationToken) -> Result<()> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.stats.write().notifications_received += 1;

        let channel = raw.channel.clone();
        let built = NotificationEvent::from_notification(sequence, raw, self.max_payload_bytes);
        let event = match built {
            Ok(event) => event,
            Err(e) => {
                log_dropped_notification("poller", sequence, &channel, &e);
                self.record_dropped();
                return Ok(());
            }
        };

        match self.sink.enqueue(event, cancel).await {
            Ok(PushOutcome::Enqueued { .. }) => self.record_enqueued(),
            Ok(PushOutcome::Displaced(oldest)) => {
                log_dropped_event("mailbox", &oldest, &RelayError::Overflow);
                self.record_enqueued();
                self.record_dropped();
            }
            Ok(PushOutcome::Rejected(event)) => {
                log_dropped_event("mailbox", &event, &RelayError::Overflow);
                self.record_dropped();
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                log_dropped_notification("poller", sequence, &channel, &e);
                self.record_dropped();
            }
        }

        Ok(())
    }

    fn set_state(&self, state: PollerState) {
        self.stats.write().state = state;
    }

    fn record_enqueued(&self) {
        let mut stats = self.stats.write();
        stats.events_enqueued += 1;
        stats.last_event_at = Some(Utc::now());
    }

    fn record_dropped(&self) {
        let mut stats = self.stats.write();
        stats.events_dropped += 1;
        stats.last_error_at = Some(Utc::now());
    }
}

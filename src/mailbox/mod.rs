//! # Notification Mailbox
//!
//! Thread-safe FIFO between the poller (single producer) and the worker pool
//! (many consumers).
//!
//! The whole queue sits behind one mutex: every push and pop, including the
//! capacity check that decides what a push does, happens inside a single
//! critical section. Waiting is done on two [`Notify`] handles, never while
//! holding the lock:
//!
//! - `not_empty` wakes one consumer per push ([`Mailbox::pop_wait`])
//! - `not_full` wakes the producer per pop ([`Mailbox::push_wait`])
//!
//! Ordering is FIFO from push to pop. With more than one worker there is no
//! ordering guarantee at the endpoint, since forwards complete concurrently.
//!
//! ## Bounding
//!
//! A mailbox is either unbounded or bounded with an [`OverflowPolicy`].
//! Unbounded mailboxes never refuse a push, so the pending count grows
//! without limit if workers stall.

pub mod metrics;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::MailboxConfig;
use crate::error::{RelayError, Result};
use crate::events::NotificationEvent;

pub use metrics::{MailboxHealth, MailboxMetrics, MailboxMonitor};

/// What a bounded mailbox does with a push when it is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Producer waits for a consumer to make room
    #[default]
    Block,
    /// Evict the head, append the new event
    DropOldest,
    /// Refuse the new event
    DropNewest,
}

/// Result of a push that did not fail
#[derive(Debug)]
pub enum PushOutcome {
    /// Appended; `pending` is the queue length right after the append
    Enqueued { pending: usize },
    /// Appended after evicting the returned head event
    Displaced(NotificationEvent),
    /// Not appended; the event is handed back
    Rejected(NotificationEvent),
}

impl PushOutcome {
    /// Event lost as a consequence of this push, if any
    pub fn dropped_event(&self) -> Option<&NotificationEvent> {
        match self {
            Self::Enqueued { .. } => None,
            Self::Displaced(event) | Self::Rejected(event) => Some(event),
        }
    }
}

enum Attempt {
    Done(PushOutcome),
    Full(NotificationEvent),
}

/// Shared FIFO of pending notification events
#[derive(Debug)]
pub struct Mailbox {
    queue: Mutex<VecDeque<NotificationEvent>>,
    capacity: Option<usize>,
    policy: OverflowPolicy,
    not_empty: Notify,
    not_full: Notify,
    monitor: MailboxMonitor,
}

impl Mailbox {
    /// Mailbox with no capacity limit
    pub fn unbounded() -> Self {
        Self::with_limits(None, OverflowPolicy::default())
    }

    /// Mailbox holding at most `capacity` events (minimum 1)
    pub fn bounded(capacity: usize, policy: OverflowPolicy) -> Self {
        Self::with_limits(Some(capacity.max(1)), policy)
    }

    /// Build from configuration; capacity `0` means unbounded
    pub fn from_config(config: &MailboxConfig) -> Self {
        match config.capacity {
            0 => Self::unbounded(),
            capacity => Self::bounded(capacity, config.overflow_policy),
        }
    }

    fn with_limits(capacity: Option<usize>, policy: OverflowPolicy) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.unwrap_or(0).min(1024))),
            capacity,
            policy,
            not_empty: Notify::new(),
            not_full: Notify::new(),
            monitor: MailboxMonitor::new("notification_mailbox", capacity),
        }
    }

    fn try_push(&self, event: NotificationEvent) -> Result<Attempt> {
        let (outcome, pending) = {
            let mut queue = self.queue.lock();

            match self.capacity {
                Some(capacity) if queue.len() >= capacity => match self.policy {
                    OverflowPolicy::Block => return Ok(Attempt::Full(event)),
                    OverflowPolicy::DropNewest => {
                        drop(queue);
                        self.monitor.record_rejected();
                        return Ok(Attempt::Done(PushOutcome::Rejected(event)));
                    }
                    OverflowPolicy::DropOldest => {
                        // capacity >= 1, so the queue is non-empty here
                        let oldest = queue.pop_front();
                        queue.push_back(event);
                        let pending = queue.len();
                        let outcome = match oldest {
                            Some(oldest) => PushOutcome::Displaced(oldest),
                            None => PushOutcome::Enqueued { pending },
                        };
                        (outcome, pending)
                    }
                },
                _ => {
                    if queue.try_reserve(1).is_err() {
                        drop(queue);
                        self.monitor.record_allocation_failure();
                        return Err(RelayError::resource_exhausted(format!(
                            "mailbox could not grow to hold event {}",
                            event.event_id
                        )));
                    }

                    queue.push_back(event);
                    let pending = queue.len();
                    (PushOutcome::Enqueued { pending }, pending)
                }
            }
        };

        self.not_empty.notify_one();

        if matches!(outcome, PushOutcome::Displaced(_)) {
            self.monitor.record_displaced();
        }
        if self.monitor.record_push(pending) {
            self.monitor.check_and_warn(pending);
        }

        Ok(Attempt::Done(outcome))
    }

    /// Append an event without waiting.
    ///
    /// Under [`OverflowPolicy::Block`] a full mailbox yields
    /// [`RelayError::MailboxFull`] and the event is dropped; producers that
    /// want to wait for room use [`Mailbox::push_wait`].
    pub fn push(&self, event: NotificationEvent) -> Result<PushOutcome> {
        match self.try_push(event)? {
            Attempt::Done(outcome) => Ok(outcome),
            Attempt::Full(_) => {
                self.monitor.record_blocked();
                Err(RelayError::MailboxFull {
                    capacity: self.capacity.unwrap_or_default(),
                })
            }
        }
    }

    /// Append an event, waiting for room under the block policy.
    ///
    /// Returns [`RelayError::ShuttingDown`] if `cancel` fires first.
    pub async fn push_wait(
        &self,
        mut event: NotificationEvent,
        cancel: &CancellationToken,
    ) -> Result<PushOutcome> {
        let mut reported_blocked = false;

        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(event)? {
                Attempt::Done(outcome) => return Ok(outcome),
                Attempt::Full(returned) => event = returned,
            }

            if !reported_blocked {
                self.monitor.record_blocked();
                reported_blocked = true;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return Err(RelayError::ShuttingDown),
            }
        }
    }

    /// Remove and return the head event, or `None` if empty. Never waits.
    pub fn pop(&self) -> Option<NotificationEvent> {
        let event = self.queue.lock().pop_front();

        if event.is_some() {
            self.monitor.record_pop();
            if self.capacity.is_some() {
                self.not_full.notify_one();
            }
        }

        event
    }

    /// Wait for the next event.
    ///
    /// Queued events are always handed out before cancellation is honoured,
    /// so `None` means the token fired and the mailbox was empty.
    pub async fn pop_wait(&self, cancel: &CancellationToken) -> Option<NotificationEvent> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(event) = self.pop() {
                return Some(event);
            }

            if cancel.is_cancelled() {
                return None;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    /// Pending count. Advisory: may be stale as soon as it returns.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// `None` when unbounded
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn metrics(&self) -> MailboxMetrics {
        self.monitor.snapshot(self.len())
    }
}

/// Destination the poller enqueues events into
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Enqueue one event, applying whatever overflow handling the sink has
    async fn enqueue(
        &self,
        event: NotificationEvent,
        cancel: &CancellationToken,
    ) -> Result<PushOutcome>;
}

#[async_trait]
impl EventSink for Mailbox {
    async fn enqueue(
        &self,
        event: NotificationEvent,
        cancel: &CancellationToken,
    ) -> Result<PushOutcome> {
        match self.policy {
            OverflowPolicy::Block => self.push_wait(event, cancel).await,
            OverflowPolicy::DropOldest | OverflowPolicy::DropNewest => self.push(event),
        }
    }
}

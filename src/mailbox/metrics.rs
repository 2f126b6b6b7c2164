//! # Mailbox Metrics
//!
//! Counters and saturation tracking for the notification mailbox.
//!
//! Every counter is a relaxed atomic so recording never contends with the
//! mailbox lock. Saturation is sampled, not computed on every push: for a
//! bounded mailbox roughly every 5% of capacity (min 100, max 1000 pushes),
//! for an unbounded one whenever the pending count crosses a multiple of
//! [`UNBOUNDED_GROWTH_WARN_STEP`].

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Pending-count step at which an unbounded mailbox logs a growth warning
pub const UNBOUNDED_GROWTH_WARN_STEP: usize = 10_000;

/// Mailbox health derived from saturation
#[derive(Debug, Clone, PartialEq)]
pub enum MailboxHealth {
    /// Below 80% of capacity, or unbounded
    Healthy,
    /// 80-95% of capacity
    Degraded { saturation_percent: f64 },
    /// Above 95% of capacity
    Critical { saturation_percent: f64 },
}

impl MailboxHealth {
    /// Create health status from a saturation ratio (0.0-1.0)
    pub fn from_saturation(saturation: f64) -> Self {
        if saturation >= 0.95 {
            Self::Critical {
                saturation_percent: saturation * 100.0,
            }
        } else if saturation >= 0.80 {
            Self::Degraded {
                saturation_percent: saturation * 100.0,
            }
        } else {
            Self::Healthy
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Point-in-time snapshot of mailbox counters
#[derive(Debug, Clone, PartialEq)]
pub struct MailboxMetrics {
    pub pushed: u64,
    pub popped: u64,
    /// Incoming events refused under drop-newest
    pub rejected: u64,
    /// Queued events evicted under drop-oldest
    pub displaced: u64,
    /// Pushes that found a block-policy mailbox full
    pub blocked: u64,
    pub allocation_failures: u64,
    pub pending: usize,
    pub capacity: Option<usize>,
    pub health: MailboxHealth,
}

/// Counter set owned by a [`Mailbox`](super::Mailbox)
#[derive(Debug)]
pub struct MailboxMonitor {
    name: String,
    capacity: Option<usize>,
    pushed: AtomicU64,
    popped: AtomicU64,
    rejected: AtomicU64,
    displaced: AtomicU64,
    blocked: AtomicU64,
    allocation_failures: AtomicU64,
}

impl MailboxMonitor {
    pub fn new(name: impl Into<String>, capacity: Option<usize>) -> Self {
        let name = name.into();

        info!(
            mailbox = %name,
            capacity = ?capacity,
            "Mailbox monitor initialized"
        );

        Self {
            name,
            capacity,
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            displaced: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            allocation_failures: AtomicU64::new(0),
        }
    }

    /// Record a successful push.
    ///
    /// Returns `true` when the caller should sample saturation.
    pub fn record_push(&self, pending: usize) -> bool {
        let count = self.pushed.fetch_add(1, Ordering::Relaxed) + 1;

        if count.is_multiple_of(10_000) {
            debug!(
                mailbox = %self.name,
                total_pushed = count,
                "Mailbox throughput milestone"
            );
        }

        match self.capacity {
            Some(capacity) => {
                let check_interval = (capacity / 20).clamp(100, 1000);
                count.is_multiple_of(check_interval as u64)
            }
            None => pending > 0 && pending.is_multiple_of(UNBOUNDED_GROWTH_WARN_STEP),
        }
    }

    pub fn record_pop(&self) {
        self.popped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        let rejected = self.rejected.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            mailbox = %self.name,
            rejected = rejected,
            "Mailbox full - incoming event DROPPED (drop_newest)"
        );
    }

    pub fn record_displaced(&self) {
        let displaced = self.displaced.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            mailbox = %self.name,
            displaced = displaced,
            "Mailbox full - oldest event DROPPED (drop_oldest)"
        );
    }

    pub fn record_blocked(&self) {
        let blocked = self.blocked.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            mailbox = %self.name,
            blocked = blocked,
            "Mailbox full - producer waiting for space"
        );
    }

    pub fn record_allocation_failure(&self) {
        self.allocation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturation as a ratio of capacity; always 0.0 when unbounded
    pub fn saturation(&self, pending: usize) -> f64 {
        match self.capacity {
            Some(capacity) if capacity > 0 => pending as f64 / capacity as f64,
            _ => 0.0,
        }
    }

    /// Log a warning if the mailbox is close to full or growing unbounded
    pub fn check_and_warn(&self, pending: usize) {
        let Some(capacity) = self.capacity else {
            if pending >= UNBOUNDED_GROWTH_WARN_STEP {
                warn!(
                    mailbox = %self.name,
                    pending = pending,
                    "Unbounded mailbox growing - workers are not keeping up"
                );
            }
            return;
        };

        let saturation = self.saturation(pending);
        if saturation >= 0.95 {
            warn!(
                mailbox = %self.name,
                saturation_percent = saturation * 100.0,
                pending = pending,
                capacity = capacity,
                "CRITICAL: Mailbox critically full (>95%)"
            );
        } else if saturation >= 0.80 {
            warn!(
                mailbox = %self.name,
                saturation_percent = saturation * 100.0,
                pending = pending,
                capacity = capacity,
                "Mailbox approaching capacity (>80%)"
            );
        }
    }

    pub fn snapshot(&self, pending: usize) -> MailboxMetrics {
        MailboxMetrics {
            pushed: self.pushed.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            displaced: self.displaced.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            pending,
            capacity: self.capacity,
            health: MailboxHealth::from_saturation(self.saturation(pending)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

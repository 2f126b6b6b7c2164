//! # Worker Pool
//!
//! Fixed-size set of forwarding workers. Each worker is a tokio task that
//! takes one event at a time from the shared [`Mailbox`], hands it to its own
//! [`Forwarder`] and then drops it, whatever the outcome. Workers never talk
//! to each other; the mailbox is the only thing they share.
//!
//! Shutdown is signal-and-join: [`WorkerPool::shutdown`] cancels the pool
//! token, workers finish the events already queued and exit, and any worker
//! still running when the timeout expires is aborted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::forwarder::Forwarder;
use crate::logging::log_dropped_event;
use crate::mailbox::Mailbox;

/// Counters shared by all workers of a pool
#[derive(Debug, Default)]
pub struct ForwardingStats {
    delivered: AtomicU64,
    error_status: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`ForwardingStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardingSnapshot {
    /// Forwards that got any HTTP response
    pub delivered: u64,
    /// Subset of `delivered` answered with a non-2xx status
    pub error_status: u64,
    /// Forwards that failed and whose event was dropped
    pub failed: u64,
}

impl ForwardingSnapshot {
    pub fn attempted(&self) -> u64 {
        self.delivered + self.failed
    }
}

impl ForwardingStats {
    pub fn record_delivered(&self, success_status: bool) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        if !success_status {
            self.error_status.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ForwardingSnapshot {
        ForwardingSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            error_status: self.error_status.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// How a pool shutdown went
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolShutdown {
    /// Workers that exited on their own
    pub joined: usize,
    /// Workers that panicked
    pub panicked: usize,
    /// Workers aborted after the shutdown timeout
    pub aborted: usize,
}

/// Supervised set of forwarding workers
pub struct WorkerPool {
    mailbox: Arc<Mailbox>,
    stats: Arc<ForwardingStats>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers.
    ///
    /// `make_forwarder` is called once per worker id before anything is
    /// spawned, so a failure leaves no task running. Workers stop when
    /// `cancel` fires and the mailbox is empty.
    pub fn spawn<F, M>(
        mailbox: Arc<Mailbox>,
        count: usize,
        cancel: CancellationToken,
        mut make_forwarder: M,
    ) -> Result<Self>
    where
        F: Forwarder + 'static,
        M: FnMut(usize) -> Result<F>,
    {
        let forwarders = (0..count)
            .map(&mut make_forwarder)
            .collect::<Result<Vec<F>>>()?;

        let stats = Arc::new(ForwardingStats::default());

        info!(worker_count = count, "Spawning forwarding workers");

        let handles = forwarders
            .into_iter()
            .enumerate()
            .map(|(worker_id, forwarder)| {
                let mailbox = Arc::clone(&mailbox);
                let stats = Arc::clone(&stats);
                let cancel = cancel.clone();
                tokio::spawn(run_worker(worker_id, mailbox, forwarder, stats, cancel))
            })
            .collect();

        Ok(Self {
            mailbox,
            stats,
            cancel,
            handles,
        })
    }

    pub fn stats(&self) -> ForwardingSnapshot {
        self.stats.snapshot()
    }

    /// Shared counters, still readable after [`shutdown`](Self::shutdown)
    /// consumes the pool
    pub fn stats_handle(&self) -> Arc<ForwardingStats> {
        Arc::clone(&self.stats)
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Check if any workers are still running
    pub fn has_active_workers(&self) -> bool {
        self.handles.iter().any(|h| !h.is_finished())
    }

    /// Cancel, drain and join all workers, aborting any still running after
    /// `timeout`
    pub async fn shutdown(mut self, timeout: Duration) -> PoolShutdown {
        info!(
            worker_count = self.handles.len(),
            pending = self.mailbox.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Initiating worker pool shutdown"
        );

        self.cancel.cancel();

        let mut report = PoolShutdown::default();
        let joined =
            tokio::time::timeout(timeout, futures::future::join_all(self.handles.iter_mut())).await;

        match joined {
            Ok(results) => {
                for (worker_id, result) in results.into_iter().enumerate() {
                    match result {
                        Ok(()) => report.joined += 1,
                        Err(join_error) => {
                            error!(
                                worker_id = worker_id,
                                error = %join_error,
                                "Worker task panicked during shutdown"
                            );
                            report.panicked += 1;
                        }
                    }
                }
            }
            Err(_) => {
                for (worker_id, handle) in self.handles.iter().enumerate() {
                    if handle.is_finished() {
                        report.joined += 1;
                    } else {
                        warn!(worker_id = worker_id, "Worker did not stop in time, aborting");
                        handle.abort();
                        report.aborted += 1;
                    }
                }
                error!(
                    timeout_ms = timeout.as_millis() as u64,
                    aborted = report.aborted,
                    pending = self.mailbox.len(),
                    "Worker pool shutdown timed out"
                );
            }
        }

        self.handles.clear();

        info!(
            joined = report.joined,
            panicked = report.panicked,
            aborted = report.aborted,
            "Worker pool shutdown completed"
        );

        report
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active = self.handles.iter().filter(|h| !h.is_finished()).count();
        if active > 0 && !self.cancel.is_cancelled() {
            error!(
                active_workers = active,
                "WorkerPool dropped with active workers, forcing cancellation"
            );
            self.cancel.cancel();
        }
    }
}

async fn run_worker<F: Forwarder>(
    worker_id: usize,
    mailbox: Arc<Mailbox>,
    forwarder: F,
    stats: Arc<ForwardingStats>,
    cancel: CancellationToken,
) {
    debug!(worker_id = worker_id, "Forwarding worker starting");

    while let Some(event) = mailbox.pop_wait(&cancel).await {
        match forwarder.forward(&event).await {
            Ok(response) => {
                stats.record_delivered(response.is_success());
                if !response.is_success() {
                    warn!(
                        worker_id = worker_id,
                        event_id = %event.event_id,
                        status = response.status,
                        "Endpoint answered with non-success status"
                    );
                }
            }
            Err(e) => {
                stats.record_failed();
                log_dropped_event("worker_pool", &event, &e);
            }
        }
    }

    debug!(worker_id = worker_id, "Forwarding worker stopped");
}

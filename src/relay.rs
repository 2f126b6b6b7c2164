//! # Relay supervisor
//!
//! Wires the pipeline together and owns its shutdown.
//!
//! [`run_pipeline`] runs the poller on the calling task until the shutdown
//! token fires or the session fails, then releases the session, shuts the
//! worker pool down (signal-and-join) and reports. [`Relay`] adds the
//! database connection, listener setup, HTTP forwarders and OS signal
//! handling on top.
//!
//! Shutdown order is fixed: poller first, so nothing new enters the
//! mailbox; session second; workers last, after they have drained what is
//! already queued.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RelayConfig;
use crate::error::Result;
use crate::forwarder::{Forwarder, HttpForwarder, RetryingForwarder};
use crate::listener::{install_and_listen, NotificationSource, PgSession};
use crate::logging::log_error;
use crate::mailbox::{Mailbox, MailboxMetrics};
use crate::poller::{NotificationPoller, PollerStats};
use crate::worker_pool::{ForwardingSnapshot, PoolShutdown, WorkerPool};

/// Why the pipeline stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The shutdown token fired (signal or caller)
    Requested,
    /// The database session failed
    SessionFailed { error: String },
}

/// Final state of a pipeline run
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub reason: ShutdownReason,
    pub poller: PollerStats,
    pub forwarding: ForwardingSnapshot,
    pub mailbox: MailboxMetrics,
    pub workers: PoolShutdown,
}

impl ShutdownReport {
    /// Events still queued when the pipeline stopped
    pub fn pending_at_exit(&self) -> usize {
        self.mailbox.pending
    }

    pub fn is_clean(&self) -> bool {
        self.reason == ShutdownReason::Requested
            && self.workers.aborted == 0
            && self.workers.panicked == 0
            && self.pending_at_exit() == 0
    }

    fn log(&self) {
        info!(
            reason = ?self.reason,
            notifications_received = self.poller.notifications_received,
            events_enqueued = self.poller.events_enqueued,
            events_dropped = self.poller.events_dropped,
            delivered = self.forwarding.delivered,
            error_status = self.forwarding.error_status,
            failed = self.forwarding.failed,
            pending_at_exit = self.pending_at_exit(),
            workers_joined = self.workers.joined,
            workers_aborted = self.workers.aborted,
            "🛑 RELAY SHUTDOWN"
        );
    }
}

/// Run the pipeline over an already listening source.
///
/// `make_forwarder` builds one forwarder per worker. Returns the report
/// when stopped through `shutdown`, or the session error after the same
/// orderly teardown.
pub async fn run_pipeline<S, F, M>(
    source: S,
    make_forwarder: M,
    config: &RelayConfig,
    shutdown: CancellationToken,
) -> Result<ShutdownReport>
where
    S: NotificationSource,
    F: Forwarder + 'static,
    M: FnMut(usize) -> Result<F>,
{
    let mailbox = Arc::new(Mailbox::from_config(&config.mailbox));

    // Separate token: workers must outlive the poller to drain the mailbox
    let pool = WorkerPool::spawn(
        Arc::clone(&mailbox),
        config.workers.count,
        CancellationToken::new(),
        make_forwarder,
    )?;
    let forwarding = pool.stats_handle();

    let mut poller = NotificationPoller::new(
        source,
        Arc::clone(&mailbox),
        config.listener.max_payload_bytes,
    );

    info!(
        workers = config.workers.count,
        mailbox_capacity = ?mailbox.capacity(),
        overflow_policy = ?mailbox.policy(),
        "Relay pipeline running"
    );

    let outcome = poller.run(&shutdown).await;
    if let Err(e) = &outcome {
        log_error("relay", "poll", e);
        // Stops retry backoff in workers still forwarding
        shutdown.cancel();
    }

    let poller_stats = poller.stats();
    let mut source = poller.into_source();
    source.release().await;
    drop(source);

    let workers = pool.shutdown(config.shutdown.timeout()).await;

    let report = ShutdownReport {
        reason: match &outcome {
            Ok(()) => ShutdownReason::Requested,
            Err(e) => ShutdownReason::SessionFailed {
                error: e.to_string(),
            },
        },
        poller: poller_stats,
        forwarding: forwarding.snapshot(),
        mailbox: mailbox.metrics(),
        workers,
    };
    report.log();

    if report.pending_at_exit() > 0 {
        warn!(
            pending = report.pending_at_exit(),
            "Events left undelivered in the mailbox"
        );
    }

    outcome.map(|()| report)
}

/// The complete relay: database session, listener setup, HTTP workers and
/// signal handling
pub struct Relay {
    config: RelayConfig,
    shutdown: CancellationToken,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Token that stops the relay when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Connect, set up the listener and relay until SIGINT/SIGTERM, the
    /// shutdown token, or a fatal session error
    pub async fn run(self) -> Result<ShutdownReport> {
        let Self { config, shutdown } = self;

        info!(
            database = %config.database.sanitized_url(),
            channel = %config.listener.channel,
            endpoint = %config.forwarder.endpoint,
            "Starting dbchange relay"
        );

        let mut session = PgSession::connect(&config.database.url).await?;

        match install_and_listen(&mut session, &config.listener).await {
            Ok(setup) => info!(
                channel = %setup.channel,
                tables_instrumented = ?setup.tables_instrumented,
                "Listener setup complete"
            ),
            Err(e) => {
                log_error("relay", "setup", &e);
                session.release().await;
                return Err(e);
            }
        }

        let signal_watcher = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown_signal() => shutdown.cancel(),
                    _ = shutdown.cancelled() => {}
                }
            })
        };

        let forwarder_config = config.forwarder.clone();
        let policy = config.retry.policy();
        let retry_cancel = shutdown.clone();
        let make_forwarder = move |_worker_id: usize| -> Result<_> {
            Ok(RetryingForwarder::with_cancellation(
                HttpForwarder::new(&forwarder_config)?,
                policy.clone(),
                retry_cancel.clone(),
            ))
        };

        let result = run_pipeline(session, make_forwarder, &config, shutdown.clone()).await;

        shutdown.cancel();
        if let Err(e) = signal_watcher.await {
            error!(error = %e, "Signal watcher task failed");
        }

        result
    }
}

/// Resolve on SIGINT (Ctrl+C) or, on unix, SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}


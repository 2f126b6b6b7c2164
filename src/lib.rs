#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # dbchange-relay
//!
//! Change-data-capture relay for PostgreSQL: listens for change
//! notifications emitted by row triggers and forwards each payload, as a
//! JSON POST, to a collection endpoint.
//!
//! ## Pipeline
//!
//! ```text
//! PostgreSQL ──NOTIFY──▶ NotificationPoller ──▶ Mailbox ──▶ WorkerPool ──▶ Forwarder ──▶ endpoint
//!              (one session)                  (FIFO)      (N workers)    (HTTP + retry)
//! ```
//!
//! - The poller owns the single database session and never waits on
//!   forwarding.
//! - The mailbox is the only state shared between concurrent units.
//! - Each worker forwards one event at a time; FIFO holds from push to pop,
//!   but with more than one worker the endpoint may see events out of order.
//!
//! ## Module Organization
//!
//! - [`config`] - Layered configuration and validation
//! - [`error`] - Error taxonomy (fatal vs. per-event)
//! - [`events`] - Notification and event types
//! - [`mailbox`] - Bounded/unbounded FIFO with overflow policies
//! - [`forwarder`] - HTTP forwarding and retry with backoff
//! - [`worker_pool`] - Forwarding workers with signal-and-join shutdown
//! - [`listener`] - PostgreSQL session and trigger/`LISTEN` setup
//! - [`poller`] - Drain loop from the session into the mailbox
//! - [`relay`] - Supervisor wiring it all together
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dbchange_relay::config::ConfigManager;
//! use dbchange_relay::Relay;
//!
//! # async fn example() -> dbchange_relay::Result<()> {
//! let config = ConfigManager::load()?.into_config();
//! let report = Relay::new(config)?.run().await?;
//! println!("delivered {} events", report.forwarding.delivered);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod forwarder;
pub mod listener;
pub mod logging;
pub mod mailbox;
pub mod poller;
pub mod relay;
pub mod worker_pool;

pub use config::{ConfigManager, RelayConfig};
pub use error::{RelayError, Result};
pub use events::{NotificationEvent, RawNotification};
pub use forwarder::{ForwardResponse, Forwarder, HttpForwarder, RetryPolicy, RetryingForwarder};
pub use listener::{install_and_listen, NotificationSource, PgSession, SetupReport};
pub use mailbox::{EventSink, Mailbox, OverflowPolicy, PushOutcome};
pub use poller::{NotificationPoller, PollerState, PollerStats};
pub use relay::{run_pipeline, Relay, ShutdownReason, ShutdownReport};
pub use worker_pool::{ForwardingSnapshot, PoolShutdown, WorkerPool};

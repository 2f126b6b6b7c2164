//! # Database listener
//!
//! The driver side of the pipeline: one long-lived PostgreSQL session that
//! has triggers installed and `LISTEN` registered, seen by the poller only
//! through [`NotificationSource`].
//!
//! `LISTEN` is session-scoped. The [`PgSession`] passed to
//! [`install_and_listen`] must be the same value later handed to the poller;
//! the types enforce this by taking it by `&mut` for setup and by value for
//! polling.

pub mod session;
pub mod setup;

use async_trait::async_trait;

use crate::error::Result;
use crate::events::RawNotification;

pub use session::PgSession;
pub use setup::{install_and_listen, SetupReport};

/// Source of change notifications for the poller
#[async_trait]
pub trait NotificationSource: Send {
    /// Take one notification the driver has already received, without
    /// waiting or touching the socket
    fn next_buffered(&mut self) -> Option<RawNotification>;

    /// Wait for the next notification.
    ///
    /// An error means the session is unusable and is fatal to the pipeline.
    async fn recv(&mut self) -> Result<RawNotification>;

    /// Give up the underlying session before it is dropped
    async fn release(&mut self) {}
}

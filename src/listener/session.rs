//! PostgreSQL session wrapper over [`PgListener`]

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use tracing::{debug, info, instrument};

use super::NotificationSource;
use crate::error::{RelayError, Result};
use crate::events::RawNotification;

/// The single database session the relay listens on
///
/// Wraps one dedicated [`PgListener`] connection with eager reconnection
/// turned off. Notifications sent while a connection is down are gone, so a
/// lost connection surfaces as [`RelayError::SessionClosed`] and the session
/// is never reopened, not even to `UNLISTEN` on release.
pub struct PgSession {
    listener: PgListener,
    closed: bool,
}

impl std::fmt::Debug for PgSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgSession").finish_non_exhaustive()
    }
}

impl PgSession {
    /// Open a dedicated session
    #[instrument(skip(url))]
    pub async fn connect(url: &str) -> Result<Self> {
        let listener = PgListener::connect(url)
            .await
            .map_err(|e| RelayError::setup("connect", e))?;

        info!("Database session established");
        Ok(Self::from_listener(listener))
    }

    /// Wrap an already connected listener
    pub fn from_listener(mut listener: PgListener) -> Self {
        listener.eager_reconnect(false);
        Self {
            listener,
            closed: false,
        }
    }

    /// Whether the connection has been lost
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Underlying listener, for running setup statements on this session
    pub(crate) fn listener_mut(&mut self) -> &mut PgListener {
        &mut self.listener
    }
}

#[async_trait]
impl NotificationSource for PgSession {
    fn next_buffered(&mut self) -> Option<RawNotification> {
        self.listener.next_buffered().map(RawNotification::from)
    }

    async fn recv(&mut self) -> Result<RawNotification> {
        if self.closed {
            return Err(RelayError::SessionClosed);
        }

        match self.listener.try_recv().await {
            Ok(Some(notification)) => Ok(notification.into()),
            Ok(None) => {
                self.closed = true;
                Err(RelayError::SessionClosed)
            }
            Err(e) => {
                self.closed = true;
                Err(RelayError::Session(e))
            }
        }
    }

    async fn release(&mut self) {
        if self.closed {
            info!("Database session already lost, nothing to release");
            return;
        }
        if let Err(e) = self.listener.unlisten_all().await {
            debug!(error = %e, "UNLISTEN during release failed, closing anyway");
        }
        info!("Database session released");
    }
}

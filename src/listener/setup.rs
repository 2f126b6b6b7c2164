//! Trigger installation and `LISTEN` registration

use tracing::{info, instrument};

use super::PgSession;
use crate::config::ListenerConfig;
use crate::error::{RelayError, Result};

/// Creates the notify trigger function and the installer function
const TRIGGER_SQL: &str = include_str!("../../sql/triggers.sql");

/// What setup did on the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupReport {
    pub channel: String,
    /// `None` when trigger installation was skipped
    pub tables_instrumented: Option<i32>,
}

/// Install triggers (unless disabled) and `LISTEN` on the configured channel.
///
/// Must run on the session that will be polled afterwards. Any failure is a
/// [`RelayError::Setup`] and is not retried.
#[instrument(skip(session, config), fields(channel = %config.channel, schema = %config.schema))]
pub async fn install_and_listen(
    session: &mut PgSession,
    config: &ListenerConfig,
) -> Result<SetupReport> {
    let listener = session.listener_mut();

    let tables_instrumented = if config.install_triggers {
        sqlx::raw_sql(TRIGGER_SQL)
            .execute(&mut *listener)
            .await
            .map_err(|e| RelayError::setup("create trigger functions", e))?;

        let tables: i32 = sqlx::query_scalar("SELECT dbchange_relay_install_triggers($1, $2)")
            .bind(&config.schema)
            .bind(&config.channel)
            .fetch_one(&mut *listener)
            .await
            .map_err(|e| RelayError::setup("install triggers", e))?;

        info!(tables = tables, "Change triggers installed");
        Some(tables)
    } else {
        info!("Trigger installation skipped");
        None
    };

    listener
        .listen(&config.channel)
        .await
        .map_err(|e| RelayError::setup("listen", e))?;

    info!("Listening for change notifications");

    Ok(SetupReport {
        channel: config.channel.clone(),
        tables_instrumented,
    })
}

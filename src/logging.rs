//! # Structured Logging Module
//!
//! Environment-aware structured logging for the relay. Console output is
//! either human-readable or JSON lines; `RUST_LOG` always wins over the
//! configured level.

use chrono::Utc;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::RelayError;
use crate::events::NotificationEvent;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging; later calls are no-ops
pub fn init_structured_logging(config: &LoggingConfig, environment: &str) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let level = if config.level.trim().is_empty() {
            get_log_level(environment)
        } else {
            config.level.clone()
        };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

        let layer = match config.format {
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed(),
        };

        // A subscriber may already be installed (tests, embedding binaries)
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            level = %level,
            format = ?config.format,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Default filter for an environment name
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log an event that left the pipeline without being delivered
pub fn log_dropped_event(component: &str, event: &NotificationEvent, reason: &RelayError) {
    tracing::warn!(
        component = %component,
        event_id = %event.event_id,
        sequence = event.sequence,
        channel = %event.channel,
        payload_bytes = event.payload_len(),
        reason = %reason,
        timestamp = %Utc::now().to_rfc3339(),
        "🗑️ DROPPED_EVENT"
    );
}

/// Log a notification that was dropped before an event could be built
pub fn log_dropped_notification(component: &str, sequence: u64, channel: &str, reason: &RelayError) {
    tracing::warn!(
        component = %component,
        sequence = sequence,
        channel = %channel,
        reason = %reason,
        timestamp = %Utc::now().to_rfc3339(),
        "🗑️ DROPPED_NOTIFICATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &RelayError) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        fatal = error.is_fatal(),
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init_structured_logging(&config, "test");
        init_structured_logging(&config, "test");
        assert!(LOGGER_INITIALIZED.get().is_some());
    }
}

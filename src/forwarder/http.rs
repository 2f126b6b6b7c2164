//! # HTTP Forwarder
//!
//! Sends an event payload as the body of a JSON POST. The body is the
//! payload bytes exactly as the trigger produced them; nothing is parsed or
//! re-serialized on the way out.
//!
//! By default only transport failures count as errors and any HTTP status is
//! returned as a [`ForwardResponse`]. Set `fail_on_error_status` to turn
//! non-2xx answers into [`RelayError::EndpointStatus`].

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Url};
use std::fmt;
use std::time::Instant;
use tracing::{debug, info};

use super::{ForwardResponse, Forwarder};
use crate::config::ForwarderConfig;
use crate::error::{RelayError, Result};
use crate::events::NotificationEvent;

/// Forwarder that POSTs each payload to a fixed endpoint
///
/// Each instance owns its own [`Client`] and connection pool. The worker
/// pool builds one per worker, so no connection state is shared between
/// concurrently forwarding workers.
#[derive(Clone)]
pub struct HttpForwarder {
    client: Client,
    endpoint: Url,
    fail_on_error_status: bool,
}

impl fmt::Debug for HttpForwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpForwarder")
            .field("endpoint", &self.endpoint.as_str())
            .field("fail_on_error_status", &self.fail_on_error_status)
            .finish()
    }
}

impl HttpForwarder {
    /// Build a forwarder from configuration
    pub fn new(config: &ForwarderConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            RelayError::config(format!("Invalid forwarder endpoint '{}': {e}", config.endpoint))
        })?;

        let mut builder = Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| RelayError::config(format!("Failed to create HTTP client: {e}")))?;

        info!(
            endpoint = %endpoint,
            timeout_ms = config.timeout_ms,
            fail_on_error_status = config.fail_on_error_status,
            "Created HTTP forwarder"
        );

        Ok(Self {
            client,
            endpoint,
            fail_on_error_status: config.fail_on_error_status,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, event: &NotificationEvent) -> Result<ForwardResponse> {
        let started = Instant::now();

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(event.payload.clone())
            .send()
            .await
            .map_err(|e| RelayError::from_transport(&e))?;

        let status = response.status();
        let duration = started.elapsed();

        debug!(
            event_id = %event.event_id,
            sequence = event.sequence,
            status = status.as_u16(),
            duration_ms = duration.as_millis() as u64,
            "Forwarded event"
        );

        if self.fail_on_error_status && !status.is_success() {
            return Err(RelayError::EndpointStatus {
                status: status.as_u16(),
            });
        }

        Ok(ForwardResponse {
            status: status.as_u16(),
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str) -> ForwarderConfig {
        ForwarderConfig {
            endpoint: endpoint.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_rejects_invalid_endpoint() {
        let err = HttpForwarder::new(&config("not a url")).unwrap_err();
        assert!(matches!(err, RelayError::Configuration { .. }));
    }

    #[test]
    fn test_debug_shows_endpoint() {
        let forwarder = HttpForwarder::new(&config("http://collector.local/events")).unwrap();
        assert_eq!(forwarder.endpoint().path(), "/events");
        assert!(format!("{forwarder:?}").contains("collector.local"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Port 9 (discard) is closed on loopback in test environments
        let forwarder = HttpForwarder::new(&config("http://127.0.0.1:9/events")).unwrap();
        let event = NotificationEvent::from_notification(
            1,
            crate::events::RawNotification::new("eave_dbchange_channel", "{}", 1),
            8000,
        )
        .unwrap();

        let err = forwarder.forward(&event).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }
}

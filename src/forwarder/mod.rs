//! # Event Forwarding
//!
//! A [`Forwarder`] delivers one event to the collection endpoint. Workers
//! hold their forwarder by value and call it once per dequeued event.
//!
//! - [`HttpForwarder`]: one JSON POST per event, no internal retry
//! - [`RetryingForwarder`]: retry-with-backoff wrapper around any forwarder

pub mod http;
pub mod retry;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::events::NotificationEvent;

pub use http::HttpForwarder;
pub use retry::{BackoffStrategy, RetryPolicy, RetryingForwarder};

/// Outcome of a forward that reached the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardResponse {
    /// HTTP status returned by the endpoint
    pub status: u16,
    /// Wall time of the request, including retries when wrapped
    pub duration: Duration,
}

impl ForwardResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Delivers a single event to its destination
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Forward one event. The payload must reach the destination unaltered.
    async fn forward(&self, event: &NotificationEvent) -> Result<ForwardResponse>;
}

#[async_trait]
impl<F: Forwarder + ?Sized> Forwarder for Box<F> {
    async fn forward(&self, event: &NotificationEvent) -> Result<ForwardResponse> {
        (**self).forward(event).await
    }
}

#[async_trait]
impl<F: Forwarder + ?Sized> Forwarder for std::sync::Arc<F> {
    async fn forward(&self, event: &NotificationEvent) -> Result<ForwardResponse> {
        (**self).forward(event).await
    }
}

//! # Notification events
//!
//! [`RawNotification`] is what a notification source hands to the poller;
//! [`NotificationEvent`] is the owned unit that flows through the mailbox to
//! a worker. The payload is carried as [`Bytes`] and never inspected or
//! re-encoded: whatever the trigger emitted is what the endpoint receives.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{RelayError, Result};

/// Hard limit on a `pg_notify` payload
pub const PG_NOTIFY_PAYLOAD_LIMIT: usize = 8000;

/// A notification as delivered by the database driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub channel: String,
    pub payload: String,
    /// Backend PID of the notifying session
    pub process_id: u32,
}

impl RawNotification {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>, process_id: u32) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
            process_id,
        }
    }
}

impl From<sqlx::postgres::PgNotification> for RawNotification {
    fn from(notification: sqlx::postgres::PgNotification) -> Self {
        Self {
            channel: notification.channel().to_string(),
            payload: notification.payload().to_string(),
            process_id: notification.process_id(),
        }
    }
}

/// One change notification on its way to the collection endpoint
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    /// Identity used for retries and log correlation
    pub event_id: Uuid,
    /// Position in drain order, assigned by the poller
    pub sequence: u64,
    pub channel: String,
    pub payload: Bytes,
    pub process_id: u32,
    pub received_at: DateTime<Utc>,
}

impl NotificationEvent {
    /// Build an event from a drained notification.
    ///
    /// Fails with [`RelayError::PayloadTooLarge`] when the payload is above
    /// `max_payload_bytes`. The payload buffer is moved, not copied.
    pub fn from_notification(
        sequence: u64,
        raw: RawNotification,
        max_payload_bytes: usize,
    ) -> Result<Self> {
        let size = raw.payload.len();
        if size > max_payload_bytes {
            return Err(RelayError::PayloadTooLarge {
                size,
                limit: max_payload_bytes,
            });
        }

        Ok(Self {
            event_id: Uuid::new_v4(),
            sequence,
            channel: raw.channel,
            payload: Bytes::from(raw.payload),
            process_id: raw.process_id,
            received_at: Utc::now(),
        })
    }

    /// Payload size in bytes
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_preserves_payload_bytes() {
        let payload = r#"{"table_name": "users", "operation": "UPDATE"}"#;
        let raw = RawNotification::new("eave_dbchange_channel", payload, 4242);

        let event = NotificationEvent::from_notification(7, raw, PG_NOTIFY_PAYLOAD_LIMIT).unwrap();

        assert_eq!(event.sequence, 7);
        assert_eq!(event.channel, "eave_dbchange_channel");
        assert_eq!(event.process_id, 4242);
        assert_eq!(&event.payload[..], payload.as_bytes());
        assert_eq!(event.payload_len(), payload.len());
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = NotificationEvent::from_notification(1, RawNotification::new("c", "A", 1), 10)
            .unwrap();
        let b = NotificationEvent::from_notification(2, RawNotification::new("c", "A", 1), 10)
            .unwrap();
        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let raw = RawNotification::new("c", "x".repeat(11), 1);
        let err = NotificationEvent::from_notification(1, raw, 10).unwrap_err();
        assert!(matches!(
            err,
            RelayError::PayloadTooLarge {
                size: 11,
                limit: 10
            }
        ));
    }

    #[test]
    fn test_empty_payload_allowed() {
        let event =
            NotificationEvent::from_notification(1, RawNotification::new("c", "", 1), 10).unwrap();
        assert!(event.payload.is_empty());
    }
}

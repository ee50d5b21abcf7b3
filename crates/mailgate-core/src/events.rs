//! Push-event wire model
//!
//! Events are serialized once per broadcast and written verbatim as the
//! `data:` payload of the push stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::imap::fetch::MessageMeta;

/// Event published to push-stream subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PushEvent {
    /// Sent to a subscriber immediately after it attaches
    #[serde(rename = "SSEReady", rename_all = "camelCase")]
    SseReady { account_id: String },

    /// The watcher selected the inbox and is listening
    #[serde(rename = "WatcherReady", rename_all = "camelCase")]
    WatcherReady { account_id: String },

    /// One new message arrived in the watched inbox
    #[serde(rename = "EmailReceived", rename_all = "camelCase")]
    EmailReceived {
        account_id: String,
        uid: u32,
        subject: Option<String>,
        from: Vec<String>,
        to: Vec<String>,
        date: Option<DateTime<Utc>>,
        flags: Vec<String>,
    },

    /// The watcher hit a fatal error and is shutting down
    #[serde(rename = "Error")]
    Error { message: String },
}

impl PushEvent {
    pub fn sse_ready(account_id: &str) -> Self {
        Self::SseReady {
            account_id: account_id.to_string(),
        }
    }

    pub fn watcher_ready(account_id: &str) -> Self {
        Self::WatcherReady {
            account_id: account_id.to_string(),
        }
    }

    pub fn email_received(account_id: &str, meta: MessageMeta) -> Self {
        Self::EmailReceived {
            account_id: account_id.to_string(),
            uid: meta.uid,
            subject: meta.subject,
            from: meta.from,
            to: meta.to,
            date: meta.date,
            flags: meta.flags,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize to the JSON payload written to subscribers
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_ready_wire_shape() {
        let json = PushEvent::sse_ready("acc1").to_json();
        assert_eq!(json, r#"{"type":"SSEReady","accountId":"acc1"}"#);
    }

    #[test]
    fn test_watcher_ready_wire_shape() {
        let json = PushEvent::watcher_ready("acc1").to_json();
        assert_eq!(json, r#"{"type":"WatcherReady","accountId":"acc1"}"#);
    }

    #[test]
    fn test_email_received_wire_shape() {
        let event = PushEvent::EmailReceived {
            account_id: "acc1".to_string(),
            uid: 1002,
            subject: Some("hello".to_string()),
            from: vec!["Alice <alice@example.com>".to_string()],
            to: vec!["bob@example.com".to_string()],
            date: None,
            flags: vec!["\\Seen".to_string()],
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["type"], "EmailReceived");
        assert_eq!(value["accountId"], "acc1");
        assert_eq!(value["uid"], 1002);
        assert_eq!(value["subject"], "hello");
        assert_eq!(value["from"][0], "Alice <alice@example.com>");
        assert_eq!(value["flags"][0], "\\Seen");
    }

    #[test]
    fn test_error_wire_shape() {
        let json = PushEvent::error("connection lost").to_json();
        assert_eq!(json, r#"{"type":"Error","message":"connection lost"}"#);
    }
}

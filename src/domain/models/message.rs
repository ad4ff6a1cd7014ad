//! Inter-agent messages carried in git notes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Message intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    Notification,
    Ack,
}

/// Delivery priority hint; messages are not reordered by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
}

/// Read/unread lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Unread,
    Read,
}

/// Sender identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderEndpoint {
    pub ai_id: String,
    pub machine: String,
    pub session_id: Option<Uuid>,
}

/// Recipient identity. `ai_id == "*"` is a broadcast to every agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientEndpoint {
    pub ai_id: String,
    pub machine: Option<String>,
}

impl RecipientEndpoint {
    pub const BROADCAST: &'static str = "*";

    pub fn matches(&self, ai_id: &str, machine: Option<&str>) -> bool {
        if self.ai_id != Self::BROADCAST && self.ai_id != ai_id {
            return false;
        }
        match (&self.machine, machine) {
            (Some(target), Some(actual)) => target == actual,
            _ => true,
        }
    }
}

/// A receipt recorded when an agent reads a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub ai_id: String,
    pub machine: String,
    pub read_at: DateTime<Utc>,
}

/// One message stored at `refs/notes/empirica/messages/<channel>/<message_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub message_id: Uuid,
    pub channel: String,
    pub from: SenderEndpoint,
    pub to: RecipientEndpoint,
    pub subject: String,
    pub body: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub reply_to: Option<Uuid>,
    /// Root of the conversation; equals message_id for thread starters.
    pub thread_id: Uuid,
    /// Seconds until expiry. 0 = never expires.
    pub ttl_seconds: i64,
    pub priority: MessagePriority,
    pub status: MessageStatus,
    pub read_by: Vec<ReadReceipt>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl AgentMessage {
    pub const DEFAULT_TTL_SECONDS: i64 = 86_400;

    pub fn new(
        from: SenderEndpoint,
        to: RecipientEndpoint,
        channel: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            message_id: id,
            channel: channel.into(),
            from,
            to,
            subject: subject.into(),
            body: body.into(),
            message_type: MessageType::Request,
            timestamp: Utc::now(),
            reply_to: None,
            thread_id: id,
            ttl_seconds: Self::DEFAULT_TTL_SECONDS,
            priority: MessagePriority::Normal,
            status: MessageStatus::Unread,
            read_by: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_ttl(mut self, ttl_seconds: i64) -> Self {
        self.ttl_seconds = ttl_seconds.max(0);
        self
    }

    pub fn in_thread(mut self, thread_id: Uuid, reply_to: Uuid) -> Self {
        self.thread_id = thread_id;
        self.reply_to = Some(reply_to);
        self
    }

    pub fn is_expired(&self) -> bool {
        if self.ttl_seconds == 0 {
            return false;
        }
        Utc::now() > self.timestamp + Duration::seconds(self.ttl_seconds)
    }

    /// Record a read receipt. Idempotent per ai_id.
    pub fn mark_read(&mut self, ai_id: &str, machine: &str) {
        if self.read_by.iter().any(|r| r.ai_id == ai_id) {
            return;
        }
        self.read_by.push(ReadReceipt {
            ai_id: ai_id.to_string(),
            machine: machine.to_string(),
            read_at: Utc::now(),
        });
        self.status = MessageStatus::Read;
    }

    pub fn is_read_by(&self, ai_id: &str) -> bool {
        self.read_by.iter().any(|r| r.ai_id == ai_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> AgentMessage {
        AgentMessage::new(
            SenderEndpoint {
                ai_id: "a1".into(),
                machine: "host-a".into(),
                session_id: None,
            },
            RecipientEndpoint {
                ai_id: "b2".into(),
                machine: None,
            },
            "crosscheck",
            "review request",
            "please verify the PKCE finding",
        )
    }

    #[test]
    fn test_thread_defaults_to_self() {
        let msg = message();
        assert_eq!(msg.thread_id, msg.message_id);
        assert!(msg.reply_to.is_none());
    }

    #[test]
    fn test_mark_read_is_idempotent() {
        let mut msg = message();
        msg.mark_read("b2", "host-b");
        msg.mark_read("b2", "host-b");
        assert_eq!(msg.read_by.len(), 1);
        assert_eq!(msg.status, MessageStatus::Read);
        assert!(msg.is_read_by("b2"));
        assert!(!msg.is_read_by("c3"));
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let msg = message().with_ttl(0);
        assert!(!msg.is_expired());
    }

    #[test]
    fn test_broadcast_recipient_matches_everyone() {
        let to = RecipientEndpoint {
            ai_id: "*".into(),
            machine: None,
        };
        assert!(to.matches("anyone", None));
        assert!(to.matches("else", Some("host-z")));

        let direct = RecipientEndpoint {
            ai_id: "b2".into(),
            machine: Some("host-b".into()),
        };
        assert!(direct.matches("b2", Some("host-b")));
        assert!(!direct.matches("b2", Some("host-c")));
        assert!(!direct.matches("c3", Some("host-b")));
    }
}

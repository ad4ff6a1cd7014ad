//! Async inter-agent messaging over git notes.
//!
//! Messages persist in git, travel with the repo, and sync via push/pull.
//! Each message gets its own ref at
//! `refs/notes/empirica/messages/<channel>/<message_id>`; the channel is
//! encoded in the ref path for cheap discovery.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::GitWorkspace;
use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{
    AgentMessage, MessageType, RecipientEndpoint, SenderEndpoint,
};

/// Message status filter for inbox queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Unread,
    Read,
    All,
}

pub struct MessageStore {
    workspace: GitWorkspace,
    machine_id: String,
}

impl MessageStore {
    const REF_PREFIX: &'static str = "refs/notes/empirica/messages/";

    pub fn new(workspace: GitWorkspace, machine_id: impl Into<String>) -> Self {
        Self {
            workspace,
            machine_id: machine_id.into(),
        }
    }

    /// Send a message. Returns its id.
    pub async fn send(&self, message: &AgentMessage) -> KernelResult<Uuid> {
        if message.channel.is_empty() {
            return Err(KernelError::BadInput("message channel is empty".into()));
        }
        let payload = serde_json::to_string_pretty(message)?;
        let note_ref = format!(
            "empirica/messages/{}/{}",
            message.channel, message.message_id
        );
        self.workspace.write_note(&note_ref, &payload).await?;
        info!(
            message_id = %message.message_id,
            channel = %message.channel,
            to = %message.to.ai_id,
            "sent message"
        );
        Ok(message.message_id)
    }

    /// Load a single message by channel and id.
    pub async fn load(&self, channel: &str, message_id: Uuid) -> KernelResult<Option<AgentMessage>> {
        let full_ref = format!("{}{channel}/{message_id}", Self::REF_PREFIX);
        match self.workspace.read_note_blob(&full_ref).await {
            Ok(blob) => Ok(Some(serde_json::from_str(&blob)?)),
            Err(KernelError::Git(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Messages addressed to `ai_id` (or broadcast), TTL-filtered, newest
    /// first. `channel = None` scans every channel.
    pub async fn inbox(
        &self,
        ai_id: &str,
        machine: Option<&str>,
        channel: Option<&str>,
        status: StatusFilter,
        limit: usize,
    ) -> KernelResult<Vec<AgentMessage>> {
        let prefix = match channel {
            Some(ch) => format!("{}{ch}/", Self::REF_PREFIX),
            None => Self::REF_PREFIX.to_string(),
        };

        let refs = self.workspace.list_refs(&prefix).await?;
        let mut messages = Vec::new();

        for full_ref in refs {
            let Some((msg_channel, msg_id)) = parse_message_ref(&full_ref) else {
                continue;
            };
            let Some(message) = self.load(&msg_channel, msg_id).await? else {
                continue;
            };

            if !message.to.matches(ai_id, machine) {
                continue;
            }
            if message.is_expired() {
                continue;
            }
            match status {
                StatusFilter::Unread if message.is_read_by(ai_id) => continue,
                StatusFilter::Read if !message.is_read_by(ai_id) => continue,
                _ => {}
            }

            messages.push(message);
            if messages.len() >= limit {
                break;
            }
        }

        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(messages)
    }

    /// Mark a message read by an agent. Idempotent: a second call leaves the
    /// read_by list unchanged.
    pub async fn mark_read(&self, channel: &str, message_id: Uuid, ai_id: &str) -> KernelResult<bool> {
        let Some(mut message) = self.load(channel, message_id).await? else {
            return Ok(false);
        };

        if message.is_read_by(ai_id) {
            return Ok(true);
        }
        message.mark_read(ai_id, &self.machine_id);
        self.send(&message).await?;
        Ok(true)
    }

    /// Reply to a message: from/to reversed, thread inherited.
    pub async fn reply(
        &self,
        original_channel: &str,
        original_id: Uuid,
        from_ai_id: &str,
        from_session_id: Option<Uuid>,
        body: &str,
    ) -> KernelResult<Option<Uuid>> {
        let Some(original) = self.load(original_channel, original_id).await? else {
            warn!(message_id = %original_id, "cannot reply: original message not found");
            return Ok(None);
        };

        let reply = AgentMessage::new(
            SenderEndpoint {
                ai_id: from_ai_id.to_string(),
                machine: self.machine_id.clone(),
                session_id: from_session_id,
            },
            RecipientEndpoint {
                ai_id: original.from.ai_id.clone(),
                machine: Some(original.from.machine.clone()),
            },
            original.channel.clone(),
            format!("Re: {}", original.subject),
            body,
        )
        .with_type(MessageType::Response)
        .in_thread(original.thread_id, original.message_id);

        self.send(&reply).await.map(Some)
    }

    /// All messages in a thread, oldest first.
    pub async fn thread(&self, thread_id: Uuid, channel: Option<&str>) -> KernelResult<Vec<AgentMessage>> {
        let prefix = match channel {
            Some(ch) => format!("{}{ch}/", Self::REF_PREFIX),
            None => Self::REF_PREFIX.to_string(),
        };
        let refs = self.workspace.list_refs(&prefix).await?;

        let mut messages = Vec::new();
        for full_ref in refs {
            let Some((msg_channel, msg_id)) = parse_message_ref(&full_ref) else {
                continue;
            };
            if let Some(message) = self.load(&msg_channel, msg_id).await? {
                if message.thread_id == thread_id {
                    messages.push(message);
                }
            }
        }
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(messages)
    }

    /// Channels that currently hold messages.
    pub async fn discover_channels(&self) -> KernelResult<Vec<String>> {
        let refs = self.workspace.list_refs(Self::REF_PREFIX).await?;
        let mut channels: Vec<String> = refs
            .iter()
            .filter_map(|r| parse_message_ref(r).map(|(ch, _)| ch))
            .collect();
        channels.sort();
        channels.dedup();
        Ok(channels)
    }

    /// Unread message counts per channel for an agent.
    pub async fn count_unread(&self, ai_id: &str) -> KernelResult<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for channel in self.discover_channels().await? {
            let unread = self
                .inbox(ai_id, None, Some(&channel), StatusFilter::Unread, usize::MAX)
                .await?;
            if !unread.is_empty() {
                counts.insert(channel, unread.len());
            }
        }
        Ok(counts)
    }

    /// Remove expired messages. Returns the removed messages (or, in dry-run
    /// mode, the ones that would be removed).
    pub async fn cleanup_expired(&self, dry_run: bool) -> KernelResult<Vec<AgentMessage>> {
        let refs = self.workspace.list_refs(Self::REF_PREFIX).await?;
        let mut removed = Vec::new();

        for full_ref in refs {
            let Some((channel, msg_id)) = parse_message_ref(&full_ref) else {
                continue;
            };
            let Some(message) = self.load(&channel, msg_id).await? else {
                continue;
            };
            if !message.is_expired() {
                continue;
            }
            if !dry_run {
                self.workspace.delete_ref(&full_ref).await?;
                debug!(message_id = %msg_id, channel = %channel, "removed expired message");
            }
            removed.push(message);
        }
        Ok(removed)
    }
}

/// `refs/notes/empirica/messages/<channel>/<message_id>` → (channel, id).
fn parse_message_ref(full_ref: &str) -> Option<(String, Uuid)> {
    let rest = full_ref.strip_prefix(MessageStore::REF_PREFIX)?;
    let (channel, id) = rest.split_once('/')?;
    let message_id = Uuid::parse_str(id).ok()?;
    (!channel.is_empty()).then(|| (channel.to_string(), message_id))
}

//! Core types shared by peers, chats and backends.

use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a peer is driven by a completion backend or by a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    Agent,
    Human,
}

/// Originator of a message: a peer, or the system itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sender {
    System,
    Peer { name: String, kind: PeerKind },
}

impl Sender {
    pub fn peer(name: impl Into<String>, kind: PeerKind) -> Self {
        Sender::Peer {
            name: name.into(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Sender::System => "system",
            Sender::Peer { name, .. } => name,
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable record of one delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: Sender,
    pub content: String,
    pub severity: Severity,
}

/// Conversation role used when a mailbox is rendered for a completion backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Role-tagged chat message as sent to completion backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// A message as stored in a peer's mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxEntry {
    pub role: Role,
    pub message: Message,
}

impl MailboxEntry {
    /// Tag `message` relative to the receiving peer `owner`.
    ///
    /// The owner's own messages are its own voice, other agents become system
    /// notes, humans become user turns and the system stays a system note.
    pub fn tag(owner: &str, message: Message) -> Self {
        let role = match &message.sender {
            Sender::System => Role::System,
            Sender::Peer { name, .. } if name == owner => Role::Assistant,
            Sender::Peer {
                kind: PeerKind::Agent,
                ..
            } => Role::System,
            Sender::Peer {
                kind: PeerKind::Human,
                ..
            } => Role::User,
        };
        Self { role, message }
    }

    /// Render for a completion request, attributing foreign peers by name.
    pub fn render(&self) -> ChatMessage {
        let content = match (&self.role, &self.message.sender) {
            (Role::Assistant, _) | (_, Sender::System) => self.message.content.clone(),
            (_, Sender::Peer { name, .. }) => format!("{}: {}", name, self.message.content),
        };
        ChatMessage {
            role: self.role,
            content,
        }
    }
}

//! Chats
//!
//! A chat is a named group of peers with an ordered transcript. Membership is
//! mirrored in every member's own chat map; only [`Peer`] and [`System`]
//! mutate it so both sides stay in agreement.
//!
//! [`System`]: crate::system::System

use crate::error::LlmuxError;
use crate::peer::Peer;
use crate::severity::Severity;
use crate::types::Sender;
use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// One transcript line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub sender: String,
    pub content: String,
    pub at: DateTime<Local>,
}

pub struct Chat {
    name: String,
    members: RwLock<BTreeMap<String, Arc<Peer>>>,
    transcript: Mutex<Vec<TranscriptEntry>>,
    sink: Mutex<Option<File>>,
}

impl Chat {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            members: RwLock::new(BTreeMap::new()),
            transcript: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
        })
    }

    /// Create a chat that also appends its transcript to
    /// `<output_dir>/chat_<name>.txt`.
    pub fn with_output(name: impl Into<String>, output_dir: &Path) -> Result<Arc<Self>, LlmuxError> {
        let name = name.into();
        std::fs::create_dir_all(output_dir)?;
        let file = File::create(output_dir.join(format!("chat_{}.txt", name)))?;
        let chat = Self::new(name);
        *chat.sink.lock() = Some(file);
        Ok(chat)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn member_names(&self) -> Vec<String> {
        self.members.read().keys().cloned().collect()
    }

    pub fn members(&self) -> Vec<Arc<Peer>> {
        self.members.read().values().cloned().collect()
    }

    pub fn contains(&self, peer_name: &str) -> bool {
        self.members.read().contains_key(peer_name)
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.lock().clone()
    }

    pub fn transcript_len(&self) -> usize {
        self.transcript.lock().len()
    }

    /// Deliver to every current member, then record once.
    pub fn broadcast(&self, sender: &Sender, content: &str, severity: Severity) {
        let members = self.members();
        debug!(
            chat = %self.name,
            sender = %sender,
            recipients = members.len(),
            severity = %severity,
            "Broadcasting message"
        );
        for member in members {
            member.receive_message(sender, content, severity);
        }
        self.record_only(sender, content);
    }

    /// Append to the transcript without delivering to anyone.
    pub fn record_only(&self, sender: &Sender, content: &str) {
        let entry = TranscriptEntry {
            sender: sender.name().to_string(),
            content: content.to_string(),
            at: Local::now(),
        };
        if let Some(file) = self.sink.lock().as_mut() {
            let written = writeln!(file, "{}", entry.at.format("%Y-%m-%d %H:%M:%S"))
                .and_then(|_| writeln!(file, "{}: {}", entry.sender, entry.content))
                .and_then(|_| file.flush());
            if let Err(e) = written {
                warn!(chat = %self.name, error = %e, "Failed to write chat transcript");
            }
        }
        self.transcript.lock().push(entry);
    }

    pub(crate) fn add_member(&self, peer: Arc<Peer>) {
        self.members.write().insert(peer.name().to_string(), peer);
    }

    pub(crate) fn remove_member(&self, peer_name: &str) -> Option<Arc<Peer>> {
        self.members.write().remove(peer_name)
    }

    /// Release the transcript file.
    pub(crate) fn close(&self) {
        self.sink.lock().take();
    }
}

impl std::fmt::Debug for Chat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chat")
            .field("name", &self.name)
            .field("members", &self.member_names())
            .field("transcript_len", &self.transcript_len())
            .finish()
    }
}

//! Recall: surface stored memories relevant to what a peer just read.

use crate::broker::Transport;
use crate::device::VectorMemory;
use crate::error::LlmuxError;
use crate::handler::{Handler, TaskContext, Work};
use crate::severity::Severity;
use crate::types::Sender;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Queries a memory with every mailbox entry that arrived since the last run
/// and posts close hits to the peer's private chat.
///
/// Hits are posted at `Trivial` while the handler itself wakes at `Info`, so
/// a recall never triggers another recall.
pub struct Recall<T>
where
    T: Transport<Payload = String, Output = Vec<f32>>,
{
    memory: Arc<VectorMemory<T>>,
    k: usize,
    max_distance: f32,
    cursor: AtomicUsize,
}

impl<T> Recall<T>
where
    T: Transport<Payload = String, Output = Vec<f32>>,
{
    pub fn new(memory: Arc<VectorMemory<T>>) -> Self {
        Self {
            memory,
            k: 3,
            max_distance: 0.4,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_max_distance(mut self, max_distance: f32) -> Self {
        self.max_distance = max_distance;
        self
    }

    pub fn into_handler(self) -> Handler {
        Handler::new("recall", Severity::Info, Arc::new(self))
    }
}

#[async_trait]
impl<T> Work for Recall<T>
where
    T: Transport<Payload = String, Output = Vec<f32>>,
{
    async fn run(&self, ctx: TaskContext) -> Result<(), LlmuxError> {
        let mailbox = ctx.peer.mailbox();
        let start = self.cursor.swap(mailbox.len(), Ordering::SeqCst).min(mailbox.len());
        let recent: String = mailbox[start..]
            .iter()
            .map(|entry| {
                let rendered = entry.render();
                format!("{}: {}\n", rendered.role.as_str(), rendered.content)
            })
            .collect();
        if recent.trim().is_empty() {
            return Ok(());
        }

        let hits: Vec<String> = self
            .memory
            .query_scored(ctx.peer.name(), &recent, self.k)
            .await
            .into_iter()
            .filter(|(distance, _)| *distance < self.max_distance)
            .map(|(_, text)| text)
            .collect();
        debug!(peer = %ctx.peer.name(), memory = %self.memory.name(), hits = hits.len(), "Recall finished");
        if hits.is_empty() {
            return Ok(());
        }

        let mut content = format!(
            "Here are relevant records in your database \"{}\":\n",
            self.memory.name()
        );
        for hit in hits {
            content.push_str(&hit);
            content.push_str("\n====\n");
        }
        ctx.peer
            .private_chat()
            .broadcast(&Sender::System, &content, Severity::Trivial);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::memory::tests::memory;
    use crate::peer::{AddressedParser, Peer, PeerConfig};
    use crate::system::System;
    use crate::types::PeerKind;

    #[tokio::test]
    async fn test_recall_posts_close_hits_once() {
        let memory = Arc::new(memory("note"));
        memory.add("bot", "aaaa").await;
        memory.add("bot", "eeee").await;

        let peer = Peer::new(PeerConfig::new(
            "bot",
            PeerKind::Agent,
            Arc::new(AddressedParser::default()),
        ))
        .unwrap();
        let ctx = TaskContext {
            peer: Arc::clone(&peer),
            system: System::default(),
        };
        let recall = Recall::new(Arc::clone(&memory)).with_k(1);

        peer.receive_message(&Sender::System, "aaaa", Severity::Info);
        recall.run(ctx.clone()).await.unwrap();

        let posted = peer.mailbox().pop().unwrap();
        assert_eq!(posted.message.severity, Severity::Trivial);
        assert!(posted.message.content.contains("\"note\""));
        assert!(posted.message.content.contains("aaaa\n====\n"));
        assert!(!posted.message.content.contains("eeee"));

        // only the posted hits are new and they are not close to anything
        let before = peer.mailbox_len();
        recall.run(ctx).await.unwrap();
        assert_eq!(peer.mailbox_len(), before);
    }
}

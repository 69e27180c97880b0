//! Agents: peers whose replies come from a completion backend.

use crate::broker::{Backend, BackendInfo, Transport};
use crate::directive::{execute, Directive};
use crate::error::LlmuxError;
use crate::handler::{Handler, TaskContext, Work};
use crate::peer::{AddressedParser, Peer, PeerConfig};
use crate::severity::Severity;
use crate::types::{ChatMessage, PeerKind, Sender};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// A backend able to continue a conversation.
#[async_trait]
pub trait ChatBackend: BackendInfo {
    async fn complete(&self, caller: &str, conversation: Vec<ChatMessage>) -> String;
}

#[async_trait]
impl<T> ChatBackend for Backend<T>
where
    T: Transport<Payload = Vec<ChatMessage>, Output = String>,
{
    async fn complete(&self, caller: &str, conversation: Vec<ChatMessage>) -> String {
        self.dispatch(caller, conversation).await
    }
}

/// Ask the backend for the next reply and send it.
pub struct CompletionWork {
    backend: Arc<dyn ChatBackend>,
}

impl CompletionWork {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Work for CompletionWork {
    async fn run(&self, ctx: TaskContext) -> Result<(), LlmuxError> {
        let conversation = ctx.peer.conversation();
        if conversation.is_empty() {
            return Ok(());
        }
        debug!(
            peer = %ctx.peer.name(),
            backend = %self.backend.name(),
            messages = conversation.len(),
            "Requesting completion"
        );
        let reply = self.backend.complete(ctx.peer.name(), conversation).await;
        let parsed = ctx.peer.send_message(&reply);
        run_directives(&ctx, &parsed.directives).await;
        Ok(())
    }
}

/// Evaluate directives in order and report each outcome privately.
pub(crate) async fn run_directives(ctx: &TaskContext, directives: &[Directive]) {
    if directives.is_empty() {
        return;
    }
    let runner = ctx.system.runner();
    for directive in directives {
        let outcome = execute(runner.as_ref(), ctx, directive).await;
        ctx.peer
            .private_chat()
            .broadcast(&Sender::System, &outcome.content, outcome.severity);
    }
}

/// Configuration for an agent backed by `backend`.
///
/// In auto mode the completion handler runs continuously; otherwise it runs
/// whenever any message reaches the agent.
pub fn agent_config(name: impl Into<String>, backend: Arc<dyn ChatBackend>, auto: bool) -> PeerConfig {
    let work: Arc<dyn Work> = Arc::new(CompletionWork::new(backend));
    let handler = if auto {
        Handler::always("completion", work)
    } else {
        Handler::new("completion", Severity::Trivial, work)
    };
    PeerConfig::new(name, PeerKind::Agent, Arc::new(AddressedParser)).with_handler(handler)
}

/// Post the agent's task on its private chat.
pub fn assign_task(peer: &Peer, task: &str) {
    peer.private_chat().broadcast(
        &Sender::System,
        &format!("Hi {}, your task is {}", peer.name(), task),
        Severity::Info,
    );
}

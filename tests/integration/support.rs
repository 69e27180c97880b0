use async_trait::async_trait;
use llmux::broker::{Backend, Transport};
use llmux::error::TransportError;
use llmux::handler::Handler;
use llmux::peer::{AddressedParser, Peer, PeerConfig};
use llmux::scheduler::SchedulerStats;
use llmux::system::System;
use llmux::types::{ChatMessage, PeerKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub fn agent(name: &str, handlers: Vec<Handler>) -> Arc<Peer> {
    let config = handlers.into_iter().fold(
        PeerConfig::new(name, PeerKind::Agent, Arc::new(AddressedParser)),
        PeerConfig::with_handler,
    );
    Peer::new(config).unwrap()
}

pub fn start(system: &System) -> JoinHandle<SchedulerStats> {
    let system = system.clone();
    tokio::spawn(async move { system.run().await })
}

pub async fn stop(system: &System, running: JoinHandle<SchedulerStats>) -> SchedulerStats {
    system.request_shutdown();
    running.await.unwrap()
}

/// Poll `condition` every 10ms for up to 10s.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Replies from a fixed script, then never answers again.
pub struct ScriptedChat {
    replies: Mutex<VecDeque<String>>,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    pub fn backend(name: &str, replies: &[&str]) -> Arc<Backend<ScriptedChat>> {
        Arc::new(Backend::new(
            name,
            "scripted chat completion",
            ScriptedChat {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                requests: Mutex::new(Vec::new()),
            },
        ))
    }
}

#[async_trait]
impl Transport for ScriptedChat {
    type Payload = Vec<ChatMessage>;
    type Output = String;

    async fn call(&self, conversation: Vec<ChatMessage>) -> Result<String, TransportError> {
        self.requests.lock().push(conversation);
        let next = self.replies.lock().pop_front();
        match next {
            Some(reply) => Ok(reply),
            None => std::future::pending().await,
        }
    }
}

/// Console input from a fixed script; end of script is end of input.
pub struct ScriptedConsole {
    lines: Mutex<VecDeque<String>>,
}

impl ScriptedConsole {
    pub fn backend(lines: &[&str]) -> Arc<Backend<ScriptedConsole>> {
        Arc::new(Backend::new(
            "scripted_console",
            "scripted keyboard input",
            ScriptedConsole {
                lines: Mutex::new(lines.iter().map(|l| l.to_string()).collect()),
            },
        ))
    }
}

#[async_trait]
impl Transport for ScriptedConsole {
    type Payload = String;
    type Output = Option<String>;

    async fn call(&self, _prompt: String) -> Result<Option<String>, TransportError> {
        Ok(self.lines.lock().pop_front())
    }
}

/// Embeds text as letter frequencies over `a..=z`.
pub struct LetterEmbedder;

#[async_trait]
impl Transport for LetterEmbedder {
    type Payload = String;
    type Output = Vec<f32>;

    async fn call(&self, text: String) -> Result<Vec<f32>, TransportError> {
        let text = text.to_lowercase();
        let total = text.chars().filter(|c| c.is_ascii_alphabetic()).count().max(1) as f32;
        Ok(('a'..='z')
            .map(|letter| text.chars().filter(|c| *c == letter).count() as f32 / total)
            .collect())
    }
}

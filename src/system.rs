//! System
//!
//! Registry of peers, chats, devices and backends, plus the switch that
//! starts and stops the event loop. `System` is a cheap handle; clones share
//! the same state.

use crate::broker::BackendInfo;
use crate::chat::Chat;
use crate::device::{CapabilityDescriptor, Device};
use crate::directive::{CommandRunner, DirectiveRunner};
use crate::error::LlmuxError;
use crate::peer::{ChatBackend, Peer};
use crate::prompt;
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::severity::Severity;
use crate::types::{PeerKind, Sender};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const PEER_NAME_TAKEN: &str = "Peer name has been used. Try another name.";
pub const CHAT_NAME_TAKEN: &str = "Chat name has been used. Try another name.";
pub const NO_SUCH_PEER: &str = "There is no such a peer.";
pub const NO_SUCH_CHAT: &str = "There is no such a chat.";

/// Construction options for a [`System`].
pub struct SystemOptions {
    /// Standing instructions posted to each agent when it is added
    pub prompt: String,
    /// Where chats created at runtime write their transcripts
    pub output_dir: Option<PathBuf>,
    pub runner: Arc<dyn DirectiveRunner>,
}

impl Default for SystemOptions {
    fn default() -> Self {
        Self {
            prompt: prompt::global_prompt(),
            output_dir: None,
            runner: Arc::new(CommandRunner),
        }
    }
}

struct SystemInner {
    peers: RwLock<BTreeMap<String, Arc<Peer>>>,
    chats: RwLock<BTreeMap<String, Arc<Chat>>>,
    devices: RwLock<BTreeMap<String, Arc<dyn Device>>>,
    backends: RwLock<BTreeMap<String, Arc<dyn BackendInfo>>>,
    chat_backends: RwLock<BTreeMap<String, Arc<dyn ChatBackend>>>,
    options: SystemOptions,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
    running: AtomicBool,
}

#[derive(Clone)]
pub struct System {
    inner: Arc<SystemInner>,
}

impl Default for System {
    fn default() -> Self {
        Self::new(SystemOptions::default())
    }
}

impl System {
    pub fn new(options: SystemOptions) -> Self {
        Self {
            inner: Arc::new(SystemInner {
                peers: RwLock::new(BTreeMap::new()),
                chats: RwLock::new(BTreeMap::new()),
                devices: RwLock::new(BTreeMap::new()),
                backends: RwLock::new(BTreeMap::new()),
                chat_backends: RwLock::new(BTreeMap::new()),
                options,
                wake: Arc::new(Notify::new()),
                shutdown: CancellationToken::new(),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Admit a peer. Agents receive the standing prompt and the device list
    /// on their private chat.
    pub fn add_peer(&self, peer: Arc<Peer>) -> String {
        {
            let mut peers = self.inner.peers.write();
            if peers.contains_key(peer.name()) {
                return PEER_NAME_TAKEN.to_string();
            }
            peers.insert(peer.name().to_string(), Arc::clone(&peer));
        }
        peer.attach_scheduler(Arc::clone(&self.inner.wake));

        if peer.kind() == PeerKind::Agent {
            let private = peer.private_chat();
            private.broadcast(&Sender::System, &self.inner.options.prompt, Severity::Info);
            private.broadcast(&Sender::System, &self.device_help(), Severity::Info);
        }
        info!(peer = %peer.name(), kind = ?peer.kind(), "Added peer");
        self.inner.wake.notify_one();
        format!("Added peer named {}", peer.name())
    }

    /// Remove a peer, leaving all its chats and cancelling its tasks.
    pub fn remove_peer(&self, name: &str) -> String {
        let Some(peer) = self.inner.peers.write().remove(name) else {
            return NO_SUCH_PEER.to_string();
        };
        let cancelled = peer.detach();
        info!(peer = %name, cancelled, "Removed peer");
        format!("Removed peer named {}", name)
    }

    pub fn add_chat(&self, chat: Arc<Chat>) -> String {
        let mut chats = self.inner.chats.write();
        if chats.contains_key(chat.name()) {
            return CHAT_NAME_TAKEN.to_string();
        }
        info!(chat = %chat.name(), "Added chat");
        let message = format!("Added chat named {}", chat.name());
        chats.insert(chat.name().to_string(), chat);
        message
    }

    /// Build a chat that writes to the configured output directory, if any.
    pub fn create_chat(&self, name: &str) -> Result<Arc<Chat>, LlmuxError> {
        match self.output_dir() {
            Some(dir) => Chat::with_output(name, dir),
            None => Ok(Chat::new(name)),
        }
    }

    /// Remove a chat; every member leaves it first.
    pub fn remove_chat(&self, name: &str) -> String {
        let Some(chat) = self.inner.chats.write().remove(name) else {
            return NO_SUCH_CHAT.to_string();
        };
        for member in chat.members() {
            member.leave(name);
        }
        chat.close();
        info!(chat = %name, "Removed chat");
        format!("Removed chat named {}", name)
    }

    /// Register a device and announce it to every peer.
    pub fn add_device(&self, device: Arc<dyn Device>) -> String {
        if self.inner.running.load(Ordering::SeqCst) {
            if let Err(e) = device.load() {
                warn!(device = %device.name(), error = %e, "Failed to load device state");
            }
        }
        let announcement = format!(
            "A new device is available. Here is its usage:\n{}",
            device.capabilities()
        );
        let name = device.name().to_string();
        self.inner.devices.write().insert(name.clone(), device);
        for peer in self.peers() {
            peer.private_chat()
                .broadcast(&Sender::System, &announcement, Severity::Info);
        }
        info!(device = %name, "Added device");
        format!("Added device named {}", name)
    }

    pub fn add_backend(&self, backend: Arc<dyn BackendInfo>) {
        info!(backend = %backend.name(), "Registered backend");
        self.inner
            .backends
            .write()
            .insert(backend.name().to_string(), backend);
    }

    /// Register a completion backend that agents may be created on.
    pub fn add_chat_backend<B: ChatBackend + 'static>(&self, backend: Arc<B>) {
        let name = backend.name().to_string();
        self.add_backend(Arc::clone(&backend) as Arc<dyn BackendInfo>);
        self.inner
            .chat_backends
            .write()
            .insert(name, backend as Arc<dyn ChatBackend>);
    }

    pub fn peer(&self, name: &str) -> Option<Arc<Peer>> {
        self.inner.peers.read().get(name).cloned()
    }

    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.inner.peers.read().values().cloned().collect()
    }

    pub fn peer_names(&self) -> Vec<String> {
        self.inner.peers.read().keys().cloned().collect()
    }

    pub fn chat(&self, name: &str) -> Option<Arc<Chat>> {
        self.inner.chats.read().get(name).cloned()
    }

    pub fn chat_names(&self) -> Vec<String> {
        self.inner.chats.read().keys().cloned().collect()
    }

    pub fn device(&self, name: &str) -> Option<Arc<dyn Device>> {
        self.inner.devices.read().get(name).cloned()
    }

    pub fn device_names(&self) -> Vec<String> {
        self.inner.devices.read().keys().cloned().collect()
    }

    pub fn chat_backend(&self, name: &str) -> Option<Arc<dyn ChatBackend>> {
        self.inner.chat_backends.read().get(name).cloned()
    }

    /// One line per registered backend.
    pub fn backend_summaries(&self) -> Vec<String> {
        self.inner
            .backends
            .read()
            .values()
            .map(|backend| {
                format!(
                    "{}: {} (min interval {:.1}s)",
                    backend.name(),
                    backend.description(),
                    backend.min_interval().as_secs_f64()
                )
            })
            .collect()
    }

    fn device_help(&self) -> String {
        let mut help = String::from("Here is the list of devices available:\n");
        for device in self.inner.devices.read().values() {
            help.push_str(&device.capabilities().to_string());
            help.push('\n');
        }
        help
    }

    pub fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::new("system", "Calls that manage peers, chats and devices.")
            .command("peers", &[], "Names of all peers.")
            .command("chats", &[], "Names of all chats.")
            .command("devices", &[], "Names of all devices.")
            .command("backends", &[], "Chat and embedding backends with their descriptions.")
            .command("add_chat", &["chat"], "Create a chat.")
            .command("remove_chat", &["chat"], "Remove a chat; its members leave it.")
            .command(
                "add_bot",
                &["name", "backend", "task", "chat"],
                "Create an agent on a chat backend, give it a task and optionally join it to a chat.",
            )
            .command("remove_peer", &["name"], "Remove a peer and cancel its work.")
            .command("exit", &[], "Stop the whole system.")
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.inner.options.output_dir.as_deref()
    }

    pub fn prompt(&self) -> &str {
        &self.inner.options.prompt
    }

    pub fn runner(&self) -> Arc<dyn DirectiveRunner> {
        Arc::clone(&self.inner.options.runner)
    }

    pub(crate) fn wake_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.inner.wake)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Ask the event loop to stop after its current iteration.
    pub fn request_shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("Shutdown requested");
        }
        self.inner.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Load device state and run the event loop until shutdown.
    pub async fn run(&self) -> SchedulerStats {
        for device in self.inner.devices.read().values() {
            if let Err(e) = device.load() {
                warn!(device = %device.name(), error = %e, "Failed to load device state");
            }
        }
        self.inner.running.store(true, Ordering::SeqCst);
        let stats = Scheduler::new(self.clone()).run().await;
        self.inner.running.store(false, Ordering::SeqCst);
        stats
    }

    /// Stop, remove every chat and peer, then persist devices.
    pub fn exit(&self) -> String {
        self.request_shutdown();
        for name in self.chat_names() {
            self.remove_chat(&name);
        }
        for name in self.peer_names() {
            self.remove_peer(&name);
        }
        for device in self.inner.devices.read().values() {
            if let Err(e) = device.save() {
                warn!(device = %device.name(), error = %e, "Failed to save device state");
            }
        }
        info!("Released all resources");
        "Released all resources, ready to exit.".to_string()
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("peers", &self.peer_names())
            .field("chats", &self.chat_names())
            .field("devices", &self.device_names())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{AddressedParser, PeerConfig};

    fn agent(name: &str) -> Arc<Peer> {
        Peer::new(PeerConfig::new(
            name,
            PeerKind::Agent,
            Arc::new(AddressedParser::default()),
        ))
        .unwrap()
    }

    #[test]
    fn test_peer_registry() {
        let system = System::default();
        let bot = agent("bot");
        assert_eq!(system.add_peer(Arc::clone(&bot)), "Added peer named bot");
        assert_eq!(system.add_peer(agent("bot")), PEER_NAME_TAKEN);
        // prompt and device list
        assert_eq!(bot.mailbox_len(), 2);

        assert_eq!(system.remove_peer("bot"), "Removed peer named bot");
        assert_eq!(system.remove_peer("bot"), NO_SUCH_PEER);
        assert!(bot.joined_chats().is_empty());
    }

    #[test]
    fn test_chat_registry_and_removal() {
        let system = System::default();
        assert_eq!(system.add_chat(Chat::new("room")), "Added chat named room");
        assert_eq!(system.add_chat(Chat::new("room")), CHAT_NAME_TAKEN);

        let a = agent("a");
        let b = agent("b");
        system.add_peer(Arc::clone(&a));
        system.add_peer(Arc::clone(&b));
        let room = system.chat("room").unwrap();
        a.join_chat(&room, false);
        b.join_chat(&room, false);

        assert_eq!(system.remove_chat("room"), "Removed chat named room");
        assert_eq!(system.remove_chat("room"), NO_SUCH_CHAT);
        assert!(room.member_names().is_empty());
        assert!(a.chat("room").is_none());
        assert!(b.chat("room").is_none());
    }

    #[test]
    fn test_removing_peer_clears_chat_membership() {
        let system = System::default();
        system.add_chat(Chat::new("room"));
        let a = agent("a");
        system.add_peer(Arc::clone(&a));
        a.join_chat(&system.chat("room").unwrap(), false);

        system.remove_peer("a");
        assert!(!system.chat("room").unwrap().contains("a"));
    }

    #[test]
    fn test_exit_releases_everything() {
        let system = System::default();
        system.add_chat(Chat::new("room"));
        system.add_peer(agent("a"));

        assert_eq!(system.exit(), "Released all resources, ready to exit.");
        assert!(system.is_shutting_down());
        assert!(system.peer_names().is_empty());
        assert!(system.chat_names().is_empty());
    }
}

//! Peers
//!
//! A peer is an actor with a mailbox, a set of joined chats and a set of
//! handlers. Incoming messages are gated against the peer threshold and then
//! each handler's threshold; outgoing messages are parsed and routed so every
//! recipient sees a message at most once, however many of the destination
//! chats it shares with the sender.

pub mod agent;
pub mod human;
pub mod parser;

pub use agent::{agent_config, assign_task, ChatBackend, CompletionWork};
pub use human::{human_config, ConsoleWork};
pub use parser::{AddressedParser, ConsoleParser, MessageParser, ParsedMessage, FORMAT_HINT};

use crate::chat::Chat;
use crate::error::LlmuxError;
use crate::handler::{Handler, HandlerState};
use crate::severity::Severity;
use crate::types::{ChatMessage, MailboxEntry, Message, PeerKind, Sender};
use chrono::Local;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Receives a copy of every message delivered to a peer.
pub trait MessageObserver: Send + Sync {
    fn on_message(&self, peer: &str, entry: &MailboxEntry);
}

/// Construction parameters for a [`Peer`].
pub struct PeerConfig {
    pub name: String,
    pub kind: PeerKind,
    /// Peer-level wake threshold, applied before handler thresholds
    pub threshold: Severity,
    pub parser: Arc<dyn MessageParser>,
    pub handlers: Vec<Handler>,
    /// Directory for the mailbox log and the private chat transcript
    pub output_dir: Option<PathBuf>,
    pub observer: Option<Arc<dyn MessageObserver>>,
}

impl PeerConfig {
    pub fn new(name: impl Into<String>, kind: PeerKind, parser: Arc<dyn MessageParser>) -> Self {
        Self {
            name: name.into(),
            kind,
            threshold: Severity::Trivial,
            parser,
            handlers: Vec::new(),
            output_dir: None,
            observer: None,
        }
    }

    pub fn with_handler(mut self, handler: Handler) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_threshold(mut self, threshold: Severity) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_output_dir(mut self, output_dir: Option<PathBuf>) -> Self {
        self.output_dir = output_dir;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn MessageObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

struct PeerState {
    chats: BTreeMap<String, Arc<Chat>>,
    mailbox: Vec<MailboxEntry>,
    threshold: Severity,
}

pub struct Peer {
    name: String,
    kind: PeerKind,
    parser: Arc<dyn MessageParser>,
    private_chat: Arc<Chat>,
    state: Mutex<PeerState>,
    handlers: Mutex<Vec<Handler>>,
    observer: Option<Arc<dyn MessageObserver>>,
    log: Mutex<Option<File>>,
    scheduler: OnceLock<Arc<Notify>>,
}

impl Peer {
    /// Create a peer and silently join it to its private chat.
    pub fn new(config: PeerConfig) -> Result<Arc<Self>, LlmuxError> {
        let private_name = format!("{}-system", config.name);
        let (private_chat, log) = match &config.output_dir {
            Some(dir) => {
                let chat = Chat::with_output(private_name, dir)?;
                let log = File::create(dir.join(format!("bot_{}.txt", config.name)))?;
                (chat, Some(log))
            }
            None => (Chat::new(private_name), None),
        };

        let peer = Arc::new(Self {
            name: config.name,
            kind: config.kind,
            parser: config.parser,
            private_chat: Arc::clone(&private_chat),
            state: Mutex::new(PeerState {
                chats: BTreeMap::new(),
                mailbox: Vec::new(),
                threshold: config.threshold,
            }),
            handlers: Mutex::new(config.handlers),
            observer: config.observer,
            log: Mutex::new(log),
            scheduler: OnceLock::new(),
        });

        peer.state
            .lock()
            .chats
            .insert(private_chat.name().to_string(), Arc::clone(&private_chat));
        private_chat.add_member(Arc::clone(&peer));

        Ok(peer)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PeerKind {
        self.kind
    }

    pub fn sender(&self) -> Sender {
        Sender::peer(self.name.clone(), self.kind)
    }

    /// The chat used for system announcements to this peer alone.
    pub fn private_chat(&self) -> &Arc<Chat> {
        &self.private_chat
    }

    pub fn threshold(&self) -> Severity {
        self.state.lock().threshold
    }

    pub fn set_threshold(&self, threshold: Severity) {
        self.state.lock().threshold = threshold;
    }

    pub fn joined_chats(&self) -> Vec<String> {
        self.state.lock().chats.keys().cloned().collect()
    }

    pub fn chat(&self, name: &str) -> Option<Arc<Chat>> {
        self.state.lock().chats.get(name).cloned()
    }

    pub fn mailbox(&self) -> Vec<MailboxEntry> {
        self.state.lock().mailbox.clone()
    }

    pub fn mailbox_len(&self) -> usize {
        self.state.lock().mailbox.len()
    }

    /// The mailbox rendered as a completion conversation.
    pub fn conversation(&self) -> Vec<ChatMessage> {
        self.state
            .lock()
            .mailbox
            .iter()
            .map(MailboxEntry::render)
            .collect()
    }

    pub fn handler_states(&self) -> Vec<HandlerState> {
        self.handlers.lock().iter().map(Handler::state).collect()
    }

    pub fn in_flight(&self) -> usize {
        self.handlers.lock().iter().map(Handler::in_flight).sum()
    }

    pub fn attach_handler(&self, handler: Handler) {
        self.handlers.lock().push(handler);
        self.notify_scheduler();
    }

    pub(crate) fn handlers(&self) -> MutexGuard<'_, Vec<Handler>> {
        self.handlers.lock()
    }

    pub(crate) fn attach_scheduler(&self, wake: Arc<Notify>) {
        let _ = self.scheduler.set(wake);
    }

    fn notify_scheduler(&self) {
        if let Some(wake) = self.scheduler.get() {
            wake.notify_one();
        }
    }

    /// Record an incoming message and promote handlers it qualifies for.
    pub fn receive_message(&self, sender: &Sender, content: &str, severity: Severity) {
        let severity = if severity == Severity::Always {
            warn!(peer = %self.name, sender = %sender, "Message tagged 'always', treating as error");
            severity.as_message_level()
        } else {
            severity
        };

        let entry = MailboxEntry::tag(
            &self.name,
            Message {
                sender: sender.clone(),
                content: content.to_string(),
                severity,
            },
        );
        self.write_log(&entry);
        if let Some(observer) = &self.observer {
            observer.on_message(&self.name, &entry);
        }

        let threshold = {
            let mut state = self.state.lock();
            state.mailbox.push(entry);
            state.threshold
        };
        if !threshold.admits(severity) {
            debug!(
                peer = %self.name,
                severity = %severity,
                threshold = %threshold,
                "Message below peer threshold"
            );
            return;
        }

        let woken = self
            .handlers
            .lock()
            .iter_mut()
            .map(|handler| handler.wake(severity))
            .filter(|woken| *woken)
            .count();
        if woken > 0 {
            debug!(peer = %self.name, woken, "Handlers became runnable");
            self.notify_scheduler();
        }
    }

    /// Parse `raw` and route it to its destination chats.
    pub fn send_message(self: &Arc<Self>, raw: &str) -> ParsedMessage {
        let parsed = self.parser.parse(self.private_chat.name(), raw);
        self.route(raw, &parsed);
        parsed
    }

    fn route(self: &Arc<Self>, raw: &str, parsed: &ParsedMessage) {
        let sender = self.sender();
        let mut error = parsed.error.clone().unwrap_or_default();
        let mut valid: Vec<Arc<Chat>> = Vec::new();

        if error.is_empty() {
            let joined = self.state.lock().chats.clone();
            let mut unknown = Vec::new();
            for destination in &parsed.destinations {
                match joined.get(destination) {
                    Some(chat) => {
                        if !valid.iter().any(|c| Arc::ptr_eq(c, chat)) {
                            valid.push(Arc::clone(chat));
                        }
                    }
                    None => unknown.push(format!("\"{}\"", destination)),
                }
            }
            if !unknown.is_empty() {
                error = format!(
                    "You cannot send message to these chats: {}. ",
                    unknown.join(", ")
                );
            }
        }

        if !error.is_empty() {
            if !error.ends_with(' ') {
                error.push(' ');
            }
            let joined = self
                .joined_chats()
                .iter()
                .map(|name| format!("\"{}\"", name))
                .collect::<Vec<_>>()
                .join(", ");
            error.push_str(&format!("You have joined these chats: {}.", joined));
            debug!(peer = %self.name, error = %error, "Rerouting message to private chat");
            self.private_chat.broadcast(&sender, raw, Severity::Info);
            self.private_chat
                .broadcast(&Sender::System, &error, Severity::Warning);
        }

        for chat in &valid {
            chat.record_only(&sender, &parsed.content);
        }

        let mut seen = HashSet::new();
        let mut receivers = Vec::new();
        for chat in &valid {
            for member in chat.members() {
                if seen.insert(member.name().to_string()) {
                    receivers.push(member);
                }
            }
        }

        debug!(
            peer = %self.name,
            chats = valid.len(),
            receivers = receivers.len(),
            "Routing message"
        );
        for receiver in receivers {
            // the sender keeps its own words verbatim
            let content = if receiver.name == self.name {
                raw
            } else {
                parsed.content.as_str()
            };
            receiver.receive_message(&sender, content, Severity::Info);
        }
    }

    /// Join `chat`, announce it there and greet this peer privately.
    pub fn join_chat(self: &Arc<Self>, chat: &Arc<Chat>, say_hi: bool) {
        self.state
            .lock()
            .chats
            .insert(chat.name().to_string(), Arc::clone(chat));
        chat.add_member(Arc::clone(self));
        self.parser.on_join(chat.name());
        info!(peer = %self.name, chat = %chat.name(), "Peer joined chat");

        chat.broadcast(
            &Sender::System,
            &format!("{} joined chat {}.", self.name, chat.name()),
            Severity::Info,
        );
        let others = chat
            .member_names()
            .into_iter()
            .filter(|name| name != &self.name)
            .map(|name| format!("\"{}\"", name))
            .collect::<Vec<_>>()
            .join(", ");
        let mut greeting = format!(
            "Hi {}, you just joined a chat with [{}].",
            self.name, others
        );
        if say_hi {
            greeting.push_str(" Say hi and introduce yourself.");
        }
        self.receive_message(&Sender::System, &greeting, Severity::Info);
    }

    pub fn quit_chat(&self, chat_name: &str) -> Result<(), LlmuxError> {
        if chat_name == self.private_chat.name() {
            return Err(LlmuxError::PrivateChat(chat_name.to_string()));
        }
        self.leave(chat_name)
            .map(|_| ())
            .ok_or_else(|| LlmuxError::NotJoined {
                peer: self.name.clone(),
                chat: chat_name.to_string(),
            })
    }

    /// Drop membership on both sides.
    pub(crate) fn leave(&self, chat_name: &str) -> Option<Arc<Chat>> {
        let chat = self.state.lock().chats.remove(chat_name)?;
        chat.remove_member(&self.name);
        info!(peer = %self.name, chat = %chat_name, "Peer left chat");
        Some(chat)
    }

    /// Leave every chat, cancel in-flight tasks and release log files.
    /// Returns the number of cancelled tasks.
    pub(crate) fn detach(&self) -> usize {
        let chats = std::mem::take(&mut self.state.lock().chats);
        for chat in chats.values() {
            chat.remove_member(&self.name);
        }
        self.private_chat.close();
        let cancelled = self
            .handlers
            .lock()
            .iter_mut()
            .map(Handler::cancel_all)
            .sum();
        self.log.lock().take();
        cancelled
    }

    /// Put every handler to sleep for `duration`.
    ///
    /// The peer threshold is raised to at least `Info` and stays there after
    /// waking; while asleep only admitted messages interrupt the sleep early.
    pub fn sleep(&self, duration: Duration) -> Result<String, LlmuxError> {
        let deadline = Instant::now().checked_add(duration).ok_or_else(|| {
            LlmuxError::DirectiveError(format!(
                "Sleep of {}s is too long",
                duration.as_secs_f64()
            ))
        })?;
        {
            let mut state = self.state.lock();
            state.threshold = state.threshold.max(Severity::Info);
        }
        for handler in self.handlers.lock().iter_mut() {
            handler.sleep_until(deadline);
        }
        self.notify_scheduler();

        let wake_at = Local::now()
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        info!(peer = %self.name, seconds = duration.as_secs_f64(), "Peer sleeping");
        Ok(format!(
            "{} sleeps until {}.",
            self.name,
            wake_at.format("%Y-%m-%d %H:%M:%S")
        ))
    }

    fn write_log(&self, entry: &MailboxEntry) {
        let mut log = self.log.lock();
        let Some(file) = log.as_mut() else {
            return;
        };
        let written = serde_json::to_string(&entry.render())
            .map_err(std::io::Error::from)
            .and_then(|line| writeln!(file, "{}", line))
            .and_then(|_| file.flush());
        if let Err(e) = written {
            warn!(peer = %self.name, error = %e, "Failed to write mailbox log");
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("chats", &self.joined_chats())
            .finish()
    }
}

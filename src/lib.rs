//! llmux: Cooperative Multi-Agent Runtime
//!
//! Agents and humans are peers that talk on named chats. Each peer owns
//! handlers that the scheduler runs as tasks when incoming messages are
//! severe enough to wake them. Model calls go through per-backend brokers
//! that space requests by a minimum interval and serve callers by priority.

pub mod broker;
pub mod chat;
pub mod config;
pub mod device;
pub mod directive;
pub mod error;
pub mod handler;
pub mod logging;
pub mod peer;
pub mod prompt;
pub mod provider;
pub mod scheduler;
pub mod severity;
pub mod system;
pub mod tooling;
pub mod types;

pub use broker::{Backend, BackendInfo, Discipline, Priority, Transport};
pub use chat::Chat;
pub use error::{LlmuxError, TransportError};
pub use handler::{Handler, TaskContext, Work};
pub use peer::{Peer, PeerConfig};
pub use severity::Severity;
pub use system::{System, SystemOptions};

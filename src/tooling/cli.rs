//! CLI Tooling
//!
//! Wires a system from configuration: one console user, one agent, a shared
//! chat, every configured backend and, when an embedding backend exists, a
//! vector memory with a recall handler on the agent.

use crate::config::{ConfigLoader, LlmuxConfig};
use crate::device::VectorMemory;
use crate::directive::CommandRunner;
use crate::error::LlmuxError;
use crate::handler::Recall;
use crate::peer::{agent_config, assign_task, human_config, MessageObserver, Peer};
use crate::prompt;
use crate::provider::profile::BackendKind;
use crate::provider::{chat_backend, console_backend, embedding_backend, Embedding};
use crate::severity::Severity;
use crate::system::{System, SystemOptions};
use crate::types::MailboxEntry;
use clap::Parser;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// llmux - cooperating agents and humans on shared chats
#[derive(Parser, Debug)]
#[command(name = "llmux")]
#[command(about = "Run an agent and a console user on a shared chat")]
pub struct Cli {
    /// Configuration file path (layered over the global config)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Task given to the agent
    #[arg(long, default_value = "Chat with the user and help with what they ask.")]
    pub task: String,

    /// Let the agent run continuously instead of only when messaged
    #[arg(long)]
    pub auto: bool,

    #[arg(long, default_value = "bot")]
    pub bot_name: String,

    #[arg(long, default_value = "user")]
    pub user_name: String,

    /// Name of the shared chat
    #[arg(long, default_value = "main")]
    pub chat: String,

    /// Chat backend for the agent; defaults to the first configured one
    #[arg(long)]
    pub backend: Option<String>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    pub print_config: bool,
}

/// Prints what a console user receives, colored by severity.
#[derive(Debug, Default)]
pub struct ConsolePrinter;

impl MessageObserver for ConsolePrinter {
    fn on_message(&self, peer: &str, entry: &MailboxEntry) {
        let sender = entry.message.sender.name();
        if sender == peer {
            return;
        }
        let label = match entry.message.severity {
            Severity::Error | Severity::Always => format!("{}", sender.red().bold()),
            Severity::Warning => format!("{}", sender.yellow().bold()),
            Severity::Info => format!("{}", sender.cyan().bold()),
            Severity::Trivial => format!("{}", sender.dimmed()),
        };
        println!("{}: {}", label, entry.message.content);
    }
}

pub fn render_default_config() -> Result<String, LlmuxError> {
    toml::to_string_pretty(&LlmuxConfig::default())
        .map_err(|e| LlmuxError::ConfigError(format!("Failed to render config: {}", e)))
}

/// Loaded configuration plus CLI overrides.
pub struct CliContext {
    config: LlmuxConfig,
}

impl CliContext {
    pub fn new(cli: &Cli) -> Result<Self, LlmuxError> {
        let mut config = ConfigLoader::load(cli.config.as_deref())
            .map_err(|e| LlmuxError::ConfigError(e.to_string()))?;
        config.validate().map_err(LlmuxError::ConfigError)?;
        if let Some(level) = &cli.log_level {
            config.logging.level = level.clone();
        }
        if let Some(file) = &cli.log_file {
            config.logging.file = Some(file.clone());
        }
        Ok(Self { config })
    }

    pub fn from_config(config: LlmuxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LlmuxConfig {
        &self.config
    }

    /// Build the system described by the configuration and `cli`.
    pub fn build_system(&self, cli: &Cli) -> Result<System, LlmuxError> {
        let settings = &self.config.system;
        let output_dir = settings.resolved_output_dir();
        if let Some(dir) = &output_dir {
            std::fs::create_dir_all(dir)?;
        }
        let system = System::new(SystemOptions {
            prompt: settings.prompt.clone().unwrap_or_else(prompt::global_prompt),
            output_dir: output_dir.clone(),
            runner: Arc::new(CommandRunner),
        });

        let mut memory: Option<Arc<VectorMemory<Embedding>>> = None;
        for (name, backend) in &self.config.backends {
            match backend.kind {
                BackendKind::Chat => system.add_chat_backend(Arc::new(chat_backend(name, backend)?)),
                BackendKind::Embedding => {
                    let embedder = Arc::new(embedding_backend(name, backend)?);
                    system.add_backend(embedder.clone());
                    if memory.is_none() {
                        let mut device = VectorMemory::new("memory", embedder);
                        if let Some(dir) = settings.resolved_storage_dir() {
                            device = device.with_storage_dir(dir);
                        }
                        memory = Some(Arc::new(device));
                    }
                }
            }
        }
        if let Some(device) = &memory {
            system.add_device(device.clone());
        }

        let chat = system.create_chat(&cli.chat)?;
        system.add_chat(Arc::clone(&chat));

        let input = Arc::new(console_backend());
        system.add_backend(input.clone());
        let user = Peer::new(
            human_config(cli.user_name.clone(), input)
                .with_output_dir(output_dir.clone())
                .with_observer(Arc::new(ConsolePrinter)),
        )?;
        system.add_peer(Arc::clone(&user));
        user.join_chat(&chat, false);

        let backend_name = match &cli.backend {
            Some(name) => name.clone(),
            None => self
                .config
                .backends
                .iter()
                .find(|(_, backend)| backend.kind == BackendKind::Chat)
                .map(|(name, _)| name.clone())
                .ok_or_else(|| LlmuxError::ConfigError("No chat backend configured".to_string()))?,
        };
        let backend = system.chat_backend(&backend_name).ok_or_else(|| {
            LlmuxError::ConfigError(format!("Unknown chat backend: {}", backend_name))
        })?;

        let mut bot_config = agent_config(cli.bot_name.clone(), backend, cli.auto).with_output_dir(output_dir);
        if let Some(device) = memory {
            bot_config = bot_config.with_handler(Recall::new(device).into_handler());
        }
        let bot = Peer::new(bot_config)?;
        system.add_peer(Arc::clone(&bot));
        assign_task(&bot, &cli.task);
        bot.join_chat(&chat, true);

        info!(
            chat = %cli.chat,
            bot = %cli.bot_name,
            user = %cli.user_name,
            backend = %backend_name,
            "System assembled"
        );
        Ok(system)
    }
}

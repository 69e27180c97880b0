//! Directives
//!
//! Agents embed commands in their output: `eval:` for a single call and
//! `exec:` for a block with one call per line. A [`DirectiveRunner`] evaluates
//! them inside the emitting peer's task; [`execute`] turns the result into a
//! system message, catching errors and panics so a bad directive never takes
//! the task down with it.

use crate::device::CapabilityDescriptor;
use crate::error::LlmuxError;
use crate::handler::TaskContext;
use crate::peer::{agent_config, assign_task, Peer};
use crate::severity::Severity;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    Eval,
    Exec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub code: String,
}

impl Directive {
    pub fn new(kind: DirectiveKind, code: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
        }
    }
}

/// What gets posted back to the emitting peer's private chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveOutcome {
    pub content: String,
    pub severity: Severity,
}

#[async_trait]
pub trait DirectiveRunner: Send + Sync {
    async fn run(&self, ctx: &TaskContext, directive: &Directive) -> Result<String, LlmuxError>;
}

/// Run `directive` and describe the result.
pub async fn execute(
    runner: &dyn DirectiveRunner,
    ctx: &TaskContext,
    directive: &Directive,
) -> DirectiveOutcome {
    debug!(peer = %ctx.peer.name(), code = %directive.code, "Running directive");
    match AssertUnwindSafe(runner.run(ctx, directive)).catch_unwind().await {
        Ok(Ok(output)) => match directive.kind {
            DirectiveKind::Eval => DirectiveOutcome {
                content: format!("Call finished. The results are {}", output),
                severity: Severity::Info,
            },
            DirectiveKind::Exec if output.trim().is_empty() => DirectiveOutcome {
                content: "Script finished without return values.".to_string(),
                severity: Severity::Trivial,
            },
            DirectiveKind::Exec => DirectiveOutcome {
                content: format!("Script finished. The results are:\n{}", output),
                severity: Severity::Info,
            },
        },
        Ok(Err(e)) => {
            warn!(peer = %ctx.peer.name(), code = %directive.code, error = %e, "Directive failed");
            DirectiveOutcome {
                content: format!("Running `{}` failed: {}", directive.code, e),
                severity: Severity::Error,
            }
        }
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            error!(peer = %ctx.peer.name(), code = %directive.code, reason = %reason, "Directive panicked");
            DirectiveOutcome {
                content: format!("Running `{}` panicked: {}", directive.code, reason),
                severity: Severity::Error,
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A parsed `target.method(args)` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub target: String,
    pub method: String,
    pub args: Vec<String>,
}

impl Call {
    /// Parse one call. A bare `method(args)` targets `system`.
    pub fn parse(expr: &str) -> Result<Self, LlmuxError> {
        let expr = expr.trim().trim_end_matches(';');
        let open = expr
            .find('(')
            .ok_or_else(|| LlmuxError::DirectiveError(format!("Expected a call, got `{}`", expr)))?;
        if !expr.ends_with(')') {
            return Err(LlmuxError::DirectiveError(format!(
                "Unclosed argument list in `{}`",
                expr
            )));
        }
        let callee = expr[..open].trim();
        let (target, method) = callee.rsplit_once('.').unwrap_or(("system", callee));
        let (target, method) = (target.trim(), method.trim());
        if method.is_empty() || target.is_empty() {
            return Err(LlmuxError::DirectiveError(format!(
                "Missing command name in `{}`",
                expr
            )));
        }
        Ok(Self {
            target: target.to_string(),
            method: method.to_string(),
            args: split_args(&expr[open + 1..expr.len() - 1])?,
        })
    }
}

fn split_args(inner: &str) -> Result<Vec<String>, LlmuxError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut quoted = false;
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(_), '\\') => match chars.next() {
                Some('n') => current.push('\n'),
                Some('t') => current.push('\t'),
                Some(other) => current.push(other),
                None => break,
            },
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                quoted = true;
            }
            (None, ',') => {
                args.push(std::mem::take(&mut current).trim().to_string());
                quoted = false;
            }
            (None, c) if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    current.push(c);
                }
            }
            (None, c) => current.push(c),
        }
    }
    if quote.is_some() {
        return Err(LlmuxError::DirectiveError(
            "Unterminated string literal".to_string(),
        ));
    }
    let last = current.trim().to_string();
    if !last.is_empty() || quoted || !args.is_empty() {
        args.push(last);
    }
    Ok(args)
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str, LlmuxError> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| LlmuxError::DirectiveError(format!("Missing argument `{}`", name)))
}

fn quoted_list(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("\"{}\"", name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Runs `self.*`, `system.*` and device commands.
#[derive(Debug, Default)]
pub struct CommandRunner;

impl CommandRunner {
    pub fn self_capabilities() -> CapabilityDescriptor {
        CapabilityDescriptor::new("self", "Calls about the peer running the command.")
            .command("name", &[], "Your name.")
            .command("chats", &[], "Chats you have joined.")
            .command("join_chat", &["chat"], "Join an existing chat.")
            .command("quit_chat", &["chat"], "Leave a chat.")
            .command(
                "sleep",
                &["seconds"],
                "Rest until the time passes or an important message arrives.",
            )
            .command(
                "set_threshold",
                &["level"],
                "Only wake for messages at least this severe: trivial, info, warning or error.",
            )
    }

    async fn call(&self, ctx: &TaskContext, expr: &str) -> Result<String, LlmuxError> {
        let call = Call::parse(expr)?;
        match call.target.as_str() {
            "self" => self.call_self(ctx, &call.method, &call.args),
            "system" => self.call_system(ctx, &call.method, &call.args),
            device_name => {
                let device = ctx.system.device(device_name).ok_or_else(|| {
                    LlmuxError::DeviceError(format!("Unknown device: {}", device_name))
                })?;
                if call.method == "help" {
                    return Ok(device.capabilities().to_string());
                }
                device
                    .invoke(ctx.peer.name(), &call.method, &call.args)
                    .await
            }
        }
    }

    fn call_self(&self, ctx: &TaskContext, method: &str, args: &[String]) -> Result<String, LlmuxError> {
        let peer = &ctx.peer;
        match method {
            "help" => Ok(Self::self_capabilities().to_string()),
            "name" => Ok(peer.name().to_string()),
            "chats" => Ok(quoted_list(&peer.joined_chats())),
            "join_chat" => {
                let name = arg(args, 0, "chat")?;
                let chat = ctx
                    .system
                    .chat(name)
                    .ok_or_else(|| LlmuxError::ChatNotFound(name.to_string()))?;
                peer.join_chat(&chat, true);
                Ok(format!("Joined chat {}", name))
            }
            "quit_chat" => {
                let name = arg(args, 0, "chat")?;
                peer.quit_chat(name)?;
                Ok(format!("Left chat {}", name))
            }
            "sleep" => {
                let raw = arg(args, 0, "seconds")?;
                let invalid =
                    || LlmuxError::DirectiveError(format!("Invalid number of seconds: {}", raw));
                let seconds: f64 = raw.parse().map_err(|_| invalid())?;
                let duration = Duration::try_from_secs_f64(seconds).map_err(|_| invalid())?;
                peer.sleep(duration)
            }
            "set_threshold" => {
                let level: Severity = arg(args, 0, "level")?
                    .parse()
                    .map_err(LlmuxError::DirectiveError)?;
                peer.set_threshold(level);
                Ok(format!("Threshold set to {}", level))
            }
            other => Err(LlmuxError::DirectiveError(format!(
                "Unknown command: self.{}",
                other
            ))),
        }
    }

    fn call_system(&self, ctx: &TaskContext, method: &str, args: &[String]) -> Result<String, LlmuxError> {
        let system = &ctx.system;
        match method {
            "help" => Ok(system.capabilities().to_string()),
            "peers" => Ok(quoted_list(&system.peer_names())),
            "chats" => Ok(quoted_list(&system.chat_names())),
            "devices" => Ok(quoted_list(&system.device_names())),
            "backends" => Ok(system.backend_summaries().join("\n")),
            "add_chat" => {
                let name = arg(args, 0, "chat")?;
                if system.chat(name).is_some() {
                    return Ok(crate::system::CHAT_NAME_TAKEN.to_string());
                }
                let chat = system.create_chat(name)?;
                Ok(system.add_chat(chat))
            }
            "remove_chat" => Ok(system.remove_chat(arg(args, 0, "chat")?)),
            "remove_peer" => {
                let name = arg(args, 0, "peer")?;
                if name == ctx.peer.name() {
                    return Err(LlmuxError::DirectiveError(
                        "A peer cannot remove itself".to_string(),
                    ));
                }
                Ok(system.remove_peer(name))
            }
            "add_bot" => {
                let name = arg(args, 0, "name")?;
                let backend_name = arg(args, 1, "backend")?;
                let task = arg(args, 2, "task")?;
                let backend = system.chat_backend(backend_name).ok_or_else(|| {
                    LlmuxError::DirectiveError(format!("Unknown chat backend: {}", backend_name))
                })?;
                if system.peer(name).is_some() {
                    return Ok(crate::system::PEER_NAME_TAKEN.to_string());
                }
                let bot = Peer::new(
                    agent_config(name, backend, false)
                        .with_output_dir(system.output_dir().map(|dir| dir.to_path_buf())),
                )?;
                let added = system.add_peer(Arc::clone(&bot));
                assign_task(&bot, task);
                if let Some(chat_name) = args.get(3) {
                    let chat = system
                        .chat(chat_name)
                        .ok_or_else(|| LlmuxError::ChatNotFound(chat_name.clone()))?;
                    bot.join_chat(&chat, true);
                }
                Ok(added)
            }
            "exit" => {
                system.request_shutdown();
                Ok("System is shutting down.".to_string())
            }
            other => Err(LlmuxError::DirectiveError(format!(
                "Unknown command: system.{}",
                other
            ))),
        }
    }
}

#[async_trait]
impl DirectiveRunner for CommandRunner {
    async fn run(&self, ctx: &TaskContext, directive: &Directive) -> Result<String, LlmuxError> {
        match directive.kind {
            DirectiveKind::Eval => self.call(ctx, &directive.code).await,
            DirectiveKind::Exec => {
                let mut results = Vec::new();
                for line in directive
                    .code
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                {
                    let output = self.call(ctx, line).await?;
                    if !output.is_empty() {
                        results.push(output);
                    }
                }
                Ok(results.join("\n"))
            }
        }
    }
}

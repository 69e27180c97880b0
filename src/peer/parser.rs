//! Turning a peer's raw output into routed content.

use crate::directive::{Directive, DirectiveKind};
use parking_lot::Mutex;
use regex::Regex;
use std::sync::OnceLock;

/// Shown to agents whose output cannot be routed.
pub const FORMAT_HINT: &str = "Start your message with \"to <chat>[, <chat>...]:\" on the first line \
to choose where it goes. Use eval: `device.command(args)` for a single command, or exec: followed \
by a ``` fenced block for one command per line.";

/// Result of parsing one raw message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    /// What other recipients and transcripts see
    pub content: String,
    pub destinations: Vec<String>,
    pub directives: Vec<Directive>,
    /// Set when the message could not be understood; routing then falls back
    /// to the private chat
    pub error: Option<String>,
}

pub trait MessageParser: Send + Sync {
    fn parse(&self, private_chat: &str, raw: &str) -> ParsedMessage;

    /// Called after the owning peer joins `chat`.
    fn on_join(&self, _chat: &str) {}
}

fn directive_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"eval:\s*`([^`\n]+)`|exec:[^\n]*\n?```([^`]+)```")
            .expect("directive pattern is valid")
    })
}

fn extract_directives(raw: &str) -> Vec<Directive> {
    directive_pattern()
        .captures_iter(raw)
        .filter_map(|caps| {
            if let Some(code) = caps.get(1) {
                Some(Directive::new(DirectiveKind::Eval, code.as_str().trim()))
            } else {
                caps.get(2)
                    .map(|code| Directive::new(DirectiveKind::Exec, code.as_str().trim()))
            }
        })
        .filter(|directive| !directive.code.is_empty())
        .collect()
}

/// Split a `to a, b: content` header off the first line.
fn split_header(raw: &str) -> Option<(Vec<String>, String)> {
    let (first_line, rest) = match raw.split_once('\n') {
        Some((first, rest)) => (first, Some(rest)),
        None => (raw, None),
    };
    let after_to = first_line.trim_start().strip_prefix("to")?;
    if !after_to.starts_with(char::is_whitespace) {
        return None;
    }
    let (targets, head) = after_to.split_once(':')?;
    let destinations: Vec<String> = targets
        .split(',')
        .map(|target| target.trim().to_string())
        .filter(|target| !target.is_empty())
        .collect();
    if destinations.is_empty() {
        return None;
    }

    let mut content = head.trim().to_string();
    if let Some(rest) = rest {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(rest);
    }
    Some((destinations, content.trim().to_string()))
}

/// Parser for agents: every message must name its chats on the first line.
#[derive(Debug, Default)]
pub struct AddressedParser;

impl MessageParser for AddressedParser {
    fn parse(&self, private_chat: &str, raw: &str) -> ParsedMessage {
        let directives = extract_directives(raw);
        if let Some((destinations, content)) = split_header(raw) {
            return ParsedMessage {
                content,
                destinations,
                directives,
                error: None,
            };
        }
        if !directives.is_empty() {
            return ParsedMessage {
                content: raw.trim().to_string(),
                destinations: vec![private_chat.to_string()],
                directives,
                error: None,
            };
        }
        ParsedMessage {
            content: raw.to_string(),
            destinations: Vec::new(),
            directives,
            error: Some(format!("Wrong format. {}", FORMAT_HINT)),
        }
    }
}

/// Parser for console users.
///
/// Lines starting with `! ` are evaluated as a directive. A `to <chat>:`
/// header is honoured; anything else goes to the chat joined last.
#[derive(Debug, Default)]
pub struct ConsoleParser {
    targets: Mutex<Vec<String>>,
}

impl ConsoleParser {
    pub fn targets(&self) -> Vec<String> {
        self.targets.lock().clone()
    }

    pub fn set_targets(&self, targets: Vec<String>) {
        *self.targets.lock() = targets;
    }
}

impl MessageParser for ConsoleParser {
    fn parse(&self, private_chat: &str, raw: &str) -> ParsedMessage {
        if let Some(code) = raw.trim_start().strip_prefix("! ") {
            return ParsedMessage {
                content: raw.trim().to_string(),
                destinations: vec![private_chat.to_string()],
                directives: vec![Directive::new(DirectiveKind::Eval, code.trim())],
                error: None,
            };
        }
        if let Some((destinations, content)) = split_header(raw) {
            return ParsedMessage {
                content,
                destinations,
                directives: Vec::new(),
                error: None,
            };
        }
        let targets = self.targets();
        if targets.is_empty() {
            return ParsedMessage {
                content: raw.to_string(),
                error: Some("You have not joined any chat yet. ".to_string()),
                ..ParsedMessage::default()
            };
        }
        ParsedMessage {
            content: raw.trim().to_string(),
            destinations: targets,
            directives: Vec::new(),
            error: None,
        }
    }

    fn on_join(&self, chat: &str) {
        self.set_targets(vec![chat.to_string()]);
    }
}

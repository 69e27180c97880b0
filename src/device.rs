//! Devices
//!
//! Tools peers can invoke through directives. A device describes its commands
//! with a [`CapabilityDescriptor`], which is what agents see when they ask for
//! help.

pub mod memory;

pub use memory::VectorMemory;

use crate::error::LlmuxError;
use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    pub args: Vec<String>,
    pub doc: String,
}

/// Human-readable description of a device and its commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub summary: String,
    pub commands: Vec<CommandSpec>,
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: summary.into(),
            commands: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, args: &[&str], doc: &str) -> Self {
        self.commands.push(CommandSpec {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            doc: doc.to_string(),
        });
        self
    }
}

impl fmt::Display for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device name: {}", self.name)?;
        writeln!(f, "{}", self.summary)?;
        if self.commands.is_empty() {
            return Ok(());
        }
        writeln!(f, "Commands:")?;
        for command in &self.commands {
            writeln!(
                f,
                "  {}.{}({}) - {}",
                self.name,
                command.name,
                command.args.join(", "),
                command.doc
            )?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait Device: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> CapabilityDescriptor;

    /// Run `command` on behalf of the peer named `caller`.
    async fn invoke(&self, caller: &str, command: &str, args: &[String]) -> Result<String, LlmuxError>;

    /// Restore persisted state. Called once when the system starts, or on
    /// admission if it is already running.
    fn load(&self) -> Result<(), LlmuxError> {
        Ok(())
    }

    /// Persist state. Called when the system exits.
    fn save(&self) -> Result<(), LlmuxError> {
        Ok(())
    }
}

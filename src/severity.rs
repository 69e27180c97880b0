//! Severity scale shared by wake thresholds and message tags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered importance of a message, also used as a wake threshold.
///
/// `Always` is a sentinel that compares greater than every ordinary level. It
/// is only meaningful as a threshold and means "ignore severities, always
/// eligible"; it is never the severity of a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Trivial,
    #[default]
    Info,
    Warning,
    Error,
    Always,
}

impl Severity {
    /// Whether a gate with this threshold lets a message of `severity` through.
    pub fn admits(self, severity: Severity) -> bool {
        self == Severity::Always || severity >= self
    }

    /// Clamp a value into the range usable as a message severity.
    pub fn as_message_level(self) -> Severity {
        if self == Severity::Always {
            Severity::Error
        } else {
            self
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trivial => "trivial",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Always => "always",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trivial" | "trivia" => Ok(Severity::Trivial),
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "always" => Ok(Severity::Always),
            other => Err(format!("Unknown severity: {}", other)),
        }
    }
}

//! Alert severity levels and the escalation merge rule.
//!
//! An [`AlertState`] is an immutable-by-convention pair of severity level
//! and explanatory message. States are merged with [`AlertState::escalate`],
//! which only ever raises the level or fills in a missing message — it never
//! downgrades an established alert within one classification pass. Workers
//! start each cycle from the identity element ([`AlertState::default`],
//! `NONE` with an empty message) and fold candidates into it, so recovery
//! across cycles happens by rebuilding, not by downgrading.

use serde::{Deserialize, Serialize};

/// Ordered alert severity.
///
/// `Unknown` ranks above `Critical` on purpose: a resource that cannot be
/// measured needs an operator more urgently than one that is measurably bad.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
    Unknown,
}

impl AlertLevel {
    /// Wire ordinal (one byte in the record codec).
    pub fn ordinal(self) -> u8 {
        match self {
            AlertLevel::None => 0,
            AlertLevel::Low => 1,
            AlertLevel::Medium => 2,
            AlertLevel::High => 3,
            AlertLevel::Critical => 4,
            AlertLevel::Unknown => 5,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(AlertLevel::None),
            1 => Some(AlertLevel::Low),
            2 => Some(AlertLevel::Medium),
            3 => Some(AlertLevel::High),
            4 => Some(AlertLevel::Critical),
            5 => Some(AlertLevel::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AlertLevel::None => "none",
            AlertLevel::Low => "low",
            AlertLevel::Medium => "medium",
            AlertLevel::High => "high",
            AlertLevel::Critical => "critical",
            AlertLevel::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// A severity level together with an operator-facing explanation.
///
/// Ordering between states considers the level only; the message is carried
/// along for display.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlertState {
    pub level: AlertLevel,
    pub message: String,
}

impl AlertState {
    pub fn new(level: AlertLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    /// Merge a candidate alert into this state.
    ///
    /// - A strictly higher candidate level is adopted together with its
    ///   message. The message closure runs only in that case, so callers can
    ///   defer expensive formatting.
    /// - At an equal level, a non-empty candidate message replaces an empty
    ///   one. An existing message is never overwritten at the same level,
    ///   and an empty candidate never replaces a populated message.
    /// - A lower candidate leaves the state untouched.
    ///
    /// Returns whether the state changed.
    pub fn escalate(&mut self, level: AlertLevel, message: impl FnOnce() -> String) -> bool {
        if level > self.level {
            self.level = level;
            self.message = message();
            return true;
        }

        if level == self.level && self.message.is_empty() {
            let candidate = message();
            if !candidate.is_empty() {
                self.message = candidate;
                return true;
            }
        }

        false
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.level)
        } else {
            write!(f, "{}: {}", self.level, self.message)
        }
    }
}

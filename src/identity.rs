//! Run identity: the `(model, mode)` pair naming one configuration.
//!
//! Externally a run identity is the single token `"{model}_{mode}"`, used as
//! the persistence namespace under an output directory. Reporting recovers the
//! pair by matching the token's tail against the closed set of known modes.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between model and mode in a run identity token.
pub const SEPARATOR: char = '_';

/// Mode reported when a token's tail matches no known mode.
pub const UNKNOWN_MODE: &str = "unknown";

/// Modes always recognised when parsing identities, even without a config registry.
pub const DEFAULT_MODES: &[&str] = &["baseline", "mcp", "augment", "full"];

/// A `(model, mode)` configuration identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunIdentity {
    pub model: String,
    pub mode: String,
}

impl RunIdentity {
    pub fn new(model: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            mode: mode.into(),
        }
    }

    /// Returns the `"{model}_{mode}"` token.
    pub fn token(&self) -> String {
        format!("{}{}{}", self.model, SEPARATOR, self.mode)
    }

    /// Returns true if the mode could not be recovered from the token.
    pub fn is_unknown_mode(&self) -> bool {
        self.mode == UNKNOWN_MODE
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.model, SEPARATOR, self.mode)
    }
}

/// The closed set of mode tokens used to reverse-parse identity tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSet {
    modes: BTreeSet<String>,
}

impl ModeSet {
    /// Creates a mode set from the given names.
    pub fn new<I, S>(modes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            modes: modes
                .into_iter()
                .map(|m| -> String { m.into() })
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    /// Adds more modes to the set.
    pub fn with_modes<I, S>(mut self, modes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modes
            .extend(modes.into_iter().map(|m| -> String { m.into() }));
        self
    }

    pub fn contains(&self, mode: &str) -> bool {
        self.modes.contains(mode)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.modes.iter().map(String::as_str)
    }

    /// Reverse-parses a `"{model}_{mode}"` token.
    ///
    /// The longest known mode whose `_{mode}` suffix ends the token wins, so
    /// multi-segment modes such as `native_augment` are recovered intact. A
    /// token with no matching tail is returned whole as the model with mode
    /// [`UNKNOWN_MODE`].
    pub fn parse(&self, token: &str) -> RunIdentity {
        let mut candidates: Vec<&String> = self.modes.iter().collect();
        candidates.sort_by_key(|m| std::cmp::Reverse(m.len()));

        for mode in candidates {
            if let Some(model) = token
                .strip_suffix(mode.as_str())
                .and_then(|rest| rest.strip_suffix(SEPARATOR))
            {
                if !model.is_empty() {
                    return RunIdentity::new(model, mode.as_str());
                }
            }
        }

        RunIdentity::new(token, UNKNOWN_MODE)
    }
}

impl Default for ModeSet {
    fn default() -> Self {
        Self::new(DEFAULT_MODES.iter().copied())
    }
}

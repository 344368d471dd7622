//! Scope string grammar
//!
//! A scope is a space-delimited list of `key:value` entries embedded in a
//! credential: `bus:customer.com channel:x5T... payload.sticky:true`
//!
//! Reserved keys:
//! - `bus` : a bus name the credential is authorized for
//! - `channel` : the channel identifier bound to the credential
//! - `payload` (and any `payload.<path>` sub-key) : privileged filtering,
//!   only allowed on privileged tokens

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reserved scope key for bus authorization entries
pub const KEY_BUS: &str = "bus";

/// Reserved scope key for the bound channel entry
pub const KEY_CHANNEL: &str = "channel";

/// Reserved scope key prefix for privileged payload filters
pub const KEY_PAYLOAD: &str = "payload";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("malformed scope token '{0}': expected exactly one ':' separator")]
    MalformedScope(String),

    #[error("empty scope token: entries must be separated by single spaces")]
    EmptyToken,
}

/// A single `key:value` scope entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeEntry {
    pub key: String,
    pub value: String,
}

impl ScopeEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// True for `payload` and any dotted `payload.<path>` key
    pub fn is_payload(&self) -> bool {
        self.key == KEY_PAYLOAD || self.key.starts_with("payload.")
    }
}

impl fmt::Display for ScopeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key, self.value)
    }
}

/// A parsed scope: an ordered sequence of entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    entries: Vec<ScopeEntry>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a scope string
    ///
    /// The empty string is the empty scope. Any malformed token fails the
    /// whole parse: a token with zero or more than one `:` (including the
    /// common `;` typo) is rejected, as are empty tokens produced by
    /// doubled, leading, or trailing spaces.
    pub fn parse(scope: &str) -> Result<Self, ScopeError> {
        if scope.is_empty() {
            return Ok(Self::new());
        }

        let mut entries = Vec::new();

        for token in scope.split(' ') {
            if token.is_empty() {
                return Err(ScopeError::EmptyToken);
            }

            if token.matches(':').count() != 1 {
                return Err(ScopeError::MalformedScope(token.to_string()));
            }

            let Some((key, value)) = token.split_once(':') else {
                return Err(ScopeError::MalformedScope(token.to_string()));
            };
            if key.is_empty() || value.is_empty() {
                return Err(ScopeError::MalformedScope(token.to_string()));
            }

            entries.push(ScopeEntry::new(key, value));
        }

        Ok(Self { entries })
    }

    /// Check a scope string without keeping the parse
    pub fn is_well_formed(scope: &str) -> bool {
        Self::parse(scope).is_ok()
    }

    /// Append an entry
    pub fn push(&mut self, entry: ScopeEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ScopeEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bus names in this scope, insertion order preserved, duplicates dropped
    pub fn buses(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for entry in &self.entries {
            if entry.key == KEY_BUS && !seen.contains(&entry.value.as_str()) {
                seen.push(entry.value.as_str());
            }
        }
        seen
    }

    /// The bound channel id, if any
    pub fn channel(&self) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.key == KEY_CHANNEL)
            .map(|e| e.value.as_str())
    }

    /// True if any entry uses a privileged `payload` key
    pub fn has_payload(&self) -> bool {
        self.entries.iter().any(ScopeEntry::is_payload)
    }

    /// True if any entry uses the `bus` key
    pub fn has_bus(&self) -> bool {
        self.entries.iter().any(|e| e.key == KEY_BUS)
    }

    /// Encode a set of bus names as `"bus:<n1> bus:<n2>"`, insertion order
    /// preserved, no trailing space
    pub fn encode_buses<'a, I>(buses: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = String::new();
        for bus in buses {
            out.push_str(KEY_BUS);
            out.push(':');
            out.push_str(bus);
            out.push(' ');
        }
        out.trim_end().to_string()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", entry)?;
        }
        Ok(())
    }
}

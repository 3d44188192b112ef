//! Newtype wrappers for git identifiers.
//!
//! Keeps commit hashes from being mixed up with branch names or other strings
//! that flow through the same git commands.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A git object hash as reported by `git rev-parse`.
///
/// The value is opaque: it is compared for equality but never interpreted, so
/// both SHA-1 and SHA-256 repositories work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha(String);

impl Sha {
    /// Creates a new Sha from a string, trimming surrounding whitespace.
    pub fn new(s: impl Into<String>) -> Self {
        let s = s.into();
        let trimmed = s.trim();
        if trimmed.len() == s.len() {
            Sha(s)
        } else {
            Sha(trimmed.to_string())
        }
    }

    /// Returns the SHA as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short (7-character) version of the SHA for display.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Sha {
    fn from(s: String) -> Self {
        Sha::new(s)
    }
}

impl From<&str> for Sha {
    fn from(s: &str) -> Self {
        Sha::new(s)
    }
}

impl AsRef<str> for Sha {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

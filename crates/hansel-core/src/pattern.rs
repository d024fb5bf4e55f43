//! Client name patterns
//!
//! Task targets and control queries select clients by regular expression.
//! A pattern must match the whole client name: `web` selects `web` but not
//! `web-2`, while `web.*` selects both.

use regex::Regex;

use crate::error::PatternError;

/// A compiled, whole-name client pattern
#[derive(Debug, Clone)]
pub struct ClientPattern {
    source: String,
    regex: Regex,
}

impl ClientPattern {
    /// Compile a pattern; invalid expressions are rejected, never treated
    /// as match-all.
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| {
            PatternError::Invalid {
                pattern: pattern.to_string(),
                source,
            }
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Whether `name` matches
    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// The pattern as written by the caller
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Display for ClientPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

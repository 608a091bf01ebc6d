use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies one write: `origin@millis`.
///
/// Tags are unique per (origin, commit timestamp). The derived ordering only
/// gives sets a deterministic iteration order; it carries no causal meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CausalTag {
    origin: String,
    timestamp_ms: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagParseError {
    #[error("causal tag '{0}' has no '@' separator")]
    MissingSeparator(String),
    #[error("causal tag '{0}' has an empty origin")]
    EmptyOrigin(String),
    #[error("causal tag '{0}' has an invalid timestamp")]
    InvalidTimestamp(String),
}

impl CausalTag {
    pub fn new(origin: &str, timestamp_ms: u64) -> Self {
        CausalTag {
            origin: origin.to_string(),
            timestamp_ms,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }
}

impl fmt::Display for CausalTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.origin, self.timestamp_ms)
    }
}

impl FromStr for CausalTag {
    type Err = TagParseError;

    // Origins may contain '@', the timestamp never does
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (origin, millis) = s
            .rsplit_once('@')
            .ok_or_else(|| TagParseError::MissingSeparator(s.to_string()))?;
        if origin.is_empty() {
            return Err(TagParseError::EmptyOrigin(s.to_string()));
        }
        let timestamp_ms = millis
            .parse()
            .map_err(|_| TagParseError::InvalidTimestamp(s.to_string()))?;
        Ok(CausalTag::new(origin, timestamp_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let tag = CausalTag::new("postgres_1", 1_696_000_000_000);
        let text = tag.to_string();
        assert_eq!(text, "postgres_1@1696000000000");
        assert_eq!(text.parse::<CausalTag>().unwrap(), tag);
    }

    #[test]
    fn test_origin_with_at_sign() {
        let tag: CausalTag = "client@host@42".parse().unwrap();
        assert_eq!(tag.origin(), "client@host");
        assert_eq!(tag.timestamp_ms(), 42);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "no-separator".parse::<CausalTag>(),
            Err(TagParseError::MissingSeparator("no-separator".to_string()))
        );
        assert!(matches!("@12".parse::<CausalTag>(), Err(TagParseError::EmptyOrigin(_))));
        assert!(matches!("a@soon".parse::<CausalTag>(), Err(TagParseError::InvalidTimestamp(_))));
    }
}

//! Case-insensitive stream names

use std::fmt;

use super::errors::{LogError, LogResult};

const MAX_NAME_LEN: usize = 255;

/// Canonical (lowercase) stream name.
///
/// Names are 1..=255 characters drawn from ASCII alphanumerics, `-`, `_`
/// and `.`, so the canonical form is also a safe object or file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamName(String);

impl StreamName {
    pub fn parse(name: &str) -> LogResult<Self> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(LogError::invalid_argument(format!(
                "Stream name must be 1..={} characters, got {}",
                MAX_NAME_LEN,
                name.len()
            )));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(LogError::invalid_argument(format!(
                "Stream name contains invalid character {:?}",
                c
            )));
        }
        if name == "." || name == ".." {
            return Err(LogError::invalid_argument("Stream name is reserved"));
        }
        Ok(Self(name.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StreamName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_lowercased() {
        assert_eq!(StreamName::parse("Orders-EU.v2").unwrap().as_str(), "orders-eu.v2");
        assert_eq!(
            StreamName::parse("ORDERS").unwrap(),
            StreamName::parse("orders").unwrap()
        );
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!(StreamName::parse("").is_err());
        assert!(StreamName::parse("a/b").is_err());
        assert!(StreamName::parse("with space").is_err());
        assert!(StreamName::parse("..").is_err());
        assert!(StreamName::parse(&"x".repeat(256)).is_err());
        assert!(StreamName::parse(&"x".repeat(255)).is_ok());
    }
}

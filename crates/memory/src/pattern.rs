//! Wildcard byte patterns
//!
//! Patterns are written the way they appear in reversing tools: space
//! separated hex byte pairs with `?` or `??` as wildcard tokens, e.g.
//! `"48 83 EC 28 E8 ?? ?? ?? ??"`. An optional label is carried for
//! diagnostics only and never affects matching.

use std::fmt;
use std::str::FromStr;

use crate::error::MemoryError;

/// Immutable byte signature with wildcard positions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    bytes: Vec<Option<u8>>,
    label: Option<String>,
}

impl Pattern {
    /// Parse a pattern string
    pub fn parse(pattern: &str) -> Result<Self, MemoryError> {
        let mut bytes = Vec::new();

        for token in pattern.split_whitespace() {
            if token == "?" || token == "??" {
                bytes.push(None);
            } else {
                let byte = u8::from_str_radix(token, 16).map_err(|_| {
                    MemoryError::InvalidPattern(format!("invalid hex byte '{token}'"))
                })?;
                bytes.push(Some(byte));
            }
        }

        if bytes.is_empty() {
            return Err(MemoryError::InvalidPattern("empty pattern".to_string()));
        }

        Ok(Pattern { bytes, label: None })
    }

    /// Parse a pattern string and attach a diagnostic label
    pub fn parse_labeled(pattern: &str, label: &str) -> Result<Self, MemoryError> {
        let mut parsed = Self::parse(pattern)?;
        parsed.label = Some(label.to_string());
        Ok(parsed)
    }

    /// Number of byte positions (wildcards included)
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Diagnostic label, falling back to the hex representation
    pub fn label(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => self.to_string(),
        }
    }

    /// Match this pattern against a window of exactly `self.len()` bytes
    pub fn matches(&self, window: &[u8]) -> bool {
        debug_assert_eq!(window.len(), self.bytes.len());
        self.bytes
            .iter()
            .zip(window)
            .all(|(expected, actual)| match expected {
                Some(byte) => byte == actual,
                None => true,
            })
    }
}

impl FromStr for Pattern {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pattern::parse(s)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match byte {
                Some(byte) => write!(f, "{byte:02X}")?,
                None => f.write_str("??")?,
            }
        }
        Ok(())
    }
}

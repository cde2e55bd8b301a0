// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Byte sizes with human-readable parsing.
//!
//! Memory tiers on the target are small and usually quoted as plain byte
//! counts (`"410000"`) or kilobytes (`"64K"`). [`ByteSize`] accepts both so
//! configuration files can use whichever the board documentation uses.

use crate::ArenaError;
use std::fmt;

/// A tier or buffer size in bytes.
///
/// # Parsing
/// - `"410000"` → 410 000 bytes
/// - `"64K"` or `"64KB"` → 64 × 1024 bytes
/// - `"8M"` or `"8MB"` → 8 × 1024² bytes
/// - `"512B"` → 512 bytes
///
/// # Examples
/// ```
/// use arena::ByteSize;
///
/// let s = ByteSize::parse("64K").unwrap();
/// assert_eq!(s.as_bytes(), 65_536);
///
/// let s = ByteSize::parse("410000").unwrap();
/// assert_eq!(s.as_bytes(), 410_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ByteSize {
    bytes: usize,
}

impl ByteSize {
    /// Creates a size from a byte count.
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    /// Creates a size from kilobytes.
    pub fn from_kb(kb: usize) -> Self {
        Self { bytes: kb * 1024 }
    }

    /// Returns the size in bytes.
    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Parses a human-readable size string. Case-insensitive.
    pub fn parse(s: &str) -> Result<Self, ArenaError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ArenaError::InvalidSize(s.to_string()));
        }

        let upper = trimmed.to_uppercase();
        let (num_str, multiplier) = if upper.ends_with("MB") {
            (&trimmed[..trimmed.len() - 2], 1024 * 1024)
        } else if upper.ends_with('M') {
            (&trimmed[..trimmed.len() - 1], 1024 * 1024)
        } else if upper.ends_with("KB") {
            (&trimmed[..trimmed.len() - 2], 1024)
        } else if upper.ends_with('K') {
            (&trimmed[..trimmed.len() - 1], 1024)
        } else if upper.ends_with('B') {
            (&trimmed[..trimmed.len() - 1], 1)
        } else {
            (trimmed, 1)
        };

        let value: usize = num_str
            .trim()
            .parse()
            .map_err(|_| ArenaError::InvalidSize(s.to_string()))?;

        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| ArenaError::InvalidSize(s.to_string()))?;

        if bytes == 0 {
            return Err(ArenaError::ZeroSized);
        }

        Ok(Self { bytes })
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bytes >= 1024 * 1024 && self.bytes % (1024 * 1024) == 0 {
            write!(f, "{} MB", self.bytes / (1024 * 1024))
        } else if self.bytes >= 1024 && self.bytes % 1024 == 0 {
            write!(f, "{} KB", self.bytes / 1024)
        } else {
            write!(f, "{} B", self.bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_bytes() {
        assert_eq!(ByteSize::parse("410000").unwrap().as_bytes(), 410_000);
        assert_eq!(ByteSize::parse("128B").unwrap().as_bytes(), 128);
    }

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(ByteSize::parse("64K").unwrap().as_bytes(), 64 * 1024);
        assert_eq!(ByteSize::parse("64kb").unwrap().as_bytes(), 64 * 1024);
        assert_eq!(ByteSize::parse("8M").unwrap().as_bytes(), 8 * 1024 * 1024);
        assert_eq!(ByteSize::parse(" 2MB ").unwrap().as_bytes(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ByteSize::parse("").is_err());
        assert!(ByteSize::parse("lots").is_err());
        assert_eq!(ByteSize::parse("0K"), Err(ArenaError::ZeroSized));
    }

    #[test]
    fn test_display() {
        assert_eq!(ByteSize::from_kb(64).to_string(), "64 KB");
        assert_eq!(ByteSize::from_bytes(410_000).to_string(), "410000 B");
        assert_eq!(ByteSize::from_bytes(3 * 1024 * 1024).to_string(), "3 MB");
    }

    #[test]
    fn test_serde_roundtrip() {
        let s = ByteSize::from_kb(44);
        let json = serde_json::to_string(&s).unwrap();
        let back: ByteSize = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }
}

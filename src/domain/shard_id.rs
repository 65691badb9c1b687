//! Shard identifiers
//!
//! Format: `shard-NNN`, a monotonically increasing number zero-padded to
//! at least three digits (`shard-001`, `shard-042`, `shard-1000`).
//! Numbers are never reused.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const PREFIX: &str = "shard-";

#[derive(Debug, Error, PartialEq)]
pub enum ShardIdError {
    #[error("Invalid shard ID format: expected 'shard-NNN', got '{0}'")]
    Invalid(String),
}

/// Identifier of one shard file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShardId {
    number: u32,
}

impl ShardId {
    /// Creates the ID for the given shard number
    pub fn new(number: u32) -> Self {
        Self { number }
    }

    /// The first shard ever allocated in a storage root
    pub fn first() -> Self {
        Self::new(1)
    }

    /// The shard number
    pub fn number(&self) -> u32 {
        self.number
    }

    /// The ID following this one
    pub fn next(&self) -> Self {
        Self::new(self.number + 1)
    }

    /// File name of the shard document (`shard-NNN.json`)
    pub fn file_name(&self) -> String {
        format!("{}.json", self)
    }
}

impl Ord for ShardId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number.cmp(&other.number)
    }
}

impl PartialOrd for ShardId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:03}", PREFIX, self.number)
    }
}

impl FromStr for ShardId {
    type Err = ShardIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| ShardIdError::Invalid(s.to_string()))?;

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(ShardIdError::Invalid(s.to_string()));
        }

        let number = digits
            .parse()
            .map_err(|_| ShardIdError::Invalid(s.to_string()))?;

        // Only the canonical spelling names a shard ("shard-1" is not "shard-001")
        let id = Self { number };
        if id.to_string() != s {
            return Err(ShardIdError::Invalid(s.to_string()));
        }

        Ok(id)
    }
}

impl TryFrom<String> for ShardId {
    type Error = ShardIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ShardId> for String {
    fn from(id: ShardId) -> Self {
        id.to_string()
    }
}

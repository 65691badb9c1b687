//! Context entries
//!
//! An entry is one stored record: free text plus creation/modification
//! timestamps and an ordered list of categories. The tag that identifies
//! it lives outside the entry, as the key of the shard's `contexts` map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamps and categories of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// A stored context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub content: String,
    pub metadata: EntryMetadata,
}

impl ContextEntry {
    /// Creates a fresh entry with `created == modified == now`
    pub fn new(content: impl Into<String>, categories: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            content: content.into(),
            metadata: EntryMetadata {
                created: now,
                modified: now,
                categories,
            },
        }
    }

    /// Returns a copy with new content and categories, keeping `created`
    pub fn revised(&self, content: impl Into<String>, categories: Vec<String>) -> Self {
        let mut modified = Utc::now();
        // Keep modification strictly after the previous one even on coarse clocks
        if modified <= self.metadata.modified {
            modified = self.metadata.modified + chrono::Duration::microseconds(1);
        }

        Self {
            content: content.into(),
            metadata: EntryMetadata {
                created: self.metadata.created,
                modified,
                categories,
            },
        }
    }

    /// Categories in insertion order
    pub fn categories(&self) -> &[String] {
        &self.metadata.categories
    }

    /// Text used by exact substring search: tag, content and categories
    pub fn search_text(&self, tag: &str) -> String {
        format!(
            "{} {} {}",
            tag,
            self.content,
            self.metadata.categories.join(" ")
        )
    }
}

/// One hit returned by a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub tag: String,
    pub entry: ContextEntry,

    /// Similarity score for fuzzy hits (0.0 is a perfect match)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

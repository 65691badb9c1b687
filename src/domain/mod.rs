//! Domain models for loccon
//!
//! Contains the record types and input rules without any I/O concerns.

mod entry;
mod shard_id;
mod validation;

pub use entry::{ContextEntry, EntryMetadata, SearchResult};
pub use shard_id::{ShardId, ShardIdError};
pub use validation::{
    ValidationError, Validator, MAX_CATEGORIES, MAX_CATEGORY_LEN, MAX_CONTENT_BYTES, MAX_TAG_LEN,
};

//! Input validation for tags, content and categories
//!
//! All checks are pure and run before any lock is taken or file touched.
//! Tags double as lookup keys in the index, so they are restricted to
//! characters that are safe in a filename.

use thiserror::Error;

/// Maximum tag length in characters
pub const MAX_TAG_LEN: usize = 100;

/// Maximum content size in bytes (1 MiB)
pub const MAX_CONTENT_BYTES: usize = 1024 * 1024;

/// Maximum number of categories per entry
pub const MAX_CATEGORIES: usize = 20;

/// Maximum category length in characters
pub const MAX_CATEGORY_LEN: usize = 50;

/// Characters that may not appear in a tag
const FORBIDDEN_TAG_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Tag cannot be empty")]
    EmptyTag,

    #[error("Tag cannot have leading or trailing whitespace")]
    TagWhitespace,

    #[error("Tag cannot be longer than 100 characters")]
    TagTooLong,

    #[error("Tag contains invalid character {0:?}")]
    TagInvalidChar(char),

    #[error("Content cannot be empty")]
    EmptyContent,

    #[error("Content cannot exceed 1048576 bytes (got {0})")]
    ContentTooLarge(usize),

    #[error("Cannot have more than 20 categories (got {0})")]
    TooManyCategories(usize),

    #[error("Categories cannot be empty strings")]
    EmptyCategory,

    #[error("Category '{0}' cannot have leading or trailing whitespace")]
    CategoryWhitespace(String),

    #[error("Category cannot be longer than 50 characters: '{0}'")]
    CategoryTooLong(String),
}

/// Stateless input checks
pub struct Validator;

impl Validator {
    /// Validates a tag: non-empty, trimmed, bounded, filesystem-safe
    pub fn validate_tag(tag: &str) -> Result<(), ValidationError> {
        if tag.is_empty() {
            return Err(ValidationError::EmptyTag);
        }

        if tag.trim() != tag {
            return Err(ValidationError::TagWhitespace);
        }

        if tag.chars().count() > MAX_TAG_LEN {
            return Err(ValidationError::TagTooLong);
        }

        if let Some(c) = tag
            .chars()
            .find(|c| c.is_control() || FORBIDDEN_TAG_CHARS.contains(c))
        {
            return Err(ValidationError::TagInvalidChar(c));
        }

        Ok(())
    }

    /// Validates content: non-empty and at most 1 MiB
    pub fn validate_content(content: &str) -> Result<(), ValidationError> {
        if content.is_empty() {
            return Err(ValidationError::EmptyContent);
        }

        if content.len() > MAX_CONTENT_BYTES {
            return Err(ValidationError::ContentTooLarge(content.len()));
        }

        Ok(())
    }

    /// Validates a category list
    pub fn validate_categories<S: AsRef<str>>(categories: &[S]) -> Result<(), ValidationError> {
        if categories.len() > MAX_CATEGORIES {
            return Err(ValidationError::TooManyCategories(categories.len()));
        }

        for category in categories {
            let category = category.as_ref();

            if category.is_empty() {
                return Err(ValidationError::EmptyCategory);
            }

            if category.trim() != category {
                return Err(ValidationError::CategoryWhitespace(category.to_string()));
            }

            if category.chars().count() > MAX_CATEGORY_LEN {
                return Err(ValidationError::CategoryTooLong(category.to_string()));
            }
        }

        Ok(())
    }

    /// Validates all inputs of an add/update in one go
    pub fn validate_entry<S: AsRef<str>>(
        tag: &str,
        content: &str,
        categories: &[S],
    ) -> Result<(), ValidationError> {
        Self::validate_tag(tag)?;
        Self::validate_content(content)?;
        Self::validate_categories(categories)
    }

    /// Strips control characters, keeping newline, carriage return and tab
    pub fn sanitize(input: &str) -> String {
        input.chars().filter(|c| !is_stripped(*c)).collect()
    }
}

/// 0x00-0x08, 0x0B, 0x0C, 0x0E-0x1F and 0x7F
fn is_stripped(c: char) -> bool {
    matches!(c, '\u{00}'..='\u{08}' | '\u{0B}' | '\u{0C}' | '\u{0E}'..='\u{1F}' | '\u{7F}')
}

//! # Tag names
//!
//! Raw user input becomes a [`TagName`] only through [`TagRules::normalize`].
//! Storage and comparison always use the canonical form: lowercase ASCII
//! letters, digits and single hyphens, within the configured length bounds.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub const TAG_MIN_LENGTH: usize = 2;
pub const TAG_MAX_LENGTH: usize = 32;

/// A canonical tag name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagName(String);

impl TagName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for TagName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Length bounds applied after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagRules {
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for TagRules {
    fn default() -> Self {
        Self {
            min_length: TAG_MIN_LENGTH,
            max_length: TAG_MAX_LENGTH,
        }
    }
}

impl TagRules {
    /// Turns raw input into its canonical form.
    ///
    /// Trims, lowercases, turns whitespace runs into a hyphen and collapses
    /// hyphen runs, then checks length and the `[a-z0-9-]` alphabet.
    ///
    /// ```
    /// use domains::TagRules;
    ///
    /// let name = TagRules::default().normalize("  My Tag  ").unwrap();
    /// assert_eq!(name.as_str(), "my-tag");
    /// ```
    pub fn normalize(&self, raw: &str) -> Result<TagName> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::InvalidFormat("tag cannot be blank".into()));
        }

        let mut cleaned = String::with_capacity(trimmed.len());
        for ch in trimmed.to_lowercase().chars() {
            if ch.is_whitespace() || ch == '-' {
                if !cleaned.ends_with('-') {
                    cleaned.push('-');
                }
            } else {
                cleaned.push(ch);
            }
        }

        let length = cleaned.chars().count();
        if length < self.min_length || length > self.max_length {
            return Err(AppError::InvalidFormat(format!(
                "tag length must be between {} and {} characters",
                self.min_length, self.max_length
            )));
        }

        if !cleaned.chars().all(is_canonical_char) {
            return Err(AppError::InvalidFormat(
                "tag contains invalid characters after normalization".into(),
            ));
        }

        Ok(TagName(cleaned))
    }
}

/// Normalizes with the default bounds.
pub fn normalize(raw: &str) -> Result<TagName> {
    TagRules::default().normalize(raw)
}

/// The looser check a boundary layer applies before normalization: letters,
/// digits, spaces and hyphens.
pub fn is_acceptable_input(raw: &str) -> bool {
    !raw.is_empty()
        && raw
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == ' ' || ch == '-')
}

fn is_canonical_char(ch: char) -> bool {
    ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-'
}

//! Behavioural switches chosen per deployment.

use serde::{Deserialize, Serialize};

/// What deleting a comment does to its row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentDeletion {
    /// Keep the row as a tombstone so replies stay attached.
    #[default]
    Soft,
    /// Remove the row and every reply beneath it.
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommentSettings {
    pub deletion: CommentDeletion,
    /// Replace the body of soft-deleted comments with a placeholder.
    pub redact_content: bool,
}

impl Default for CommentSettings {
    fn default() -> Self {
        Self {
            deletion: CommentDeletion::Soft,
            redact_content: true,
        }
    }
}

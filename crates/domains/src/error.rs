//! # AppError
//!
//! Centralized error handling for the forum engine.
//! Every failure a service returns is one of these variants; the transport
//! layer maps [`AppError::kind`] onto its own status codes.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the authorization policy refused an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The actor is blocked.
    Blocked,
    /// The actor neither owns the entity nor holds the admin role.
    NotOwnerOrAdmin,
    /// The action is reserved for admins.
    AdminOnly,
    /// Liking your own post or comment.
    SelfLike,
    /// An admin blocking, unblocking or promoting itself.
    SelfTarget,
    /// A reply whose parent lives under another post.
    WrongPostReply,
    /// The comment has been soft-deleted.
    Tombstoned,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::Blocked => "blocked users cannot perform this action",
            Self::NotOwnerOrAdmin => "you are not allowed to modify this content",
            Self::AdminOnly => "you are not authorized to perform this action",
            Self::SelfLike => "you cannot like your own content",
            Self::SelfTarget => "admins cannot perform this action on themselves",
            Self::WrongPostReply => "reply must be under the same post as the parent comment",
            Self::Tombstoned => "the comment has been deleted",
        };
        f.write_str(message)
    }
}

/// Client-visible category of an [`AppError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    BadRequest,
    Conflict,
    Internal,
}

/// The primary error type for all forum operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Referenced post, comment, tag or user does not exist
    #[error("{entity} not found with {field} {value}")]
    NotFound {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    /// Denied by the authorization policy
    #[error("forbidden: {0}")]
    Forbidden(DenyReason),

    /// Tag name rejected by the normalizer, or an unparseable query parameter
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Duplicate unique key, or a write that kept losing to concurrent writers
    #[error("conflict: {0}")]
    Conflict(String),

    /// Infrastructure failure (e.g., store unavailable)
    #[error("internal service error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(entity: &'static str, field: &'static str, value: impl ToString) -> Self {
        Self::NotFound {
            entity,
            field,
            value: value.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::InvalidFormat(_) => ErrorKind::BadRequest,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The denial reason, when this is an authorization failure.
    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Self::Forbidden(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Failures reported by repository adapters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// A unique key (tag name, username, email) is already taken
    #[error("duplicate {0}")]
    UniqueViolation(&'static str),

    /// The row changed since it was read
    #[error("{entity} {id} was modified concurrently")]
    StaleVersion { entity: &'static str, id: String },

    /// The row vanished between read and write
    #[error("{entity} {id} no longer exists")]
    Missing { entity: &'static str, id: String },

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::UniqueViolation(key) => Self::Conflict(format!("duplicate {key}")),
            RepositoryError::StaleVersion { .. } => Self::Conflict(err.to_string()),
            RepositoryError::Missing { entity, id } => Self::NotFound {
                entity,
                field: "id",
                value: id,
            },
            RepositoryError::Backend(message) => Self::Internal(message),
        }
    }
}

/// A specialized Result type for forum logic.
pub type Result<T> = std::result::Result<T, AppError>;

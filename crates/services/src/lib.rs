//! forum/crates/services/src/lib.rs
//!
//! Use-case orchestration: each service loads entities through the ports,
//! consults the [`policy`], mutates and persists. The acting identity is
//! always an explicit argument.

pub mod comment_service;
pub mod policy;
pub mod post_service;
pub mod tag_registry;
pub mod user_service;

pub use comment_service::CommentService;
pub use policy::Decision;
pub use post_service::PostService;
pub use tag_registry::TagRegistry;
pub use user_service::UserService;

/// How many times a version-checked write is attempted before the service
/// gives up with a conflict.
pub const MAX_WRITE_ATTEMPTS: usize = 3;

/// Whether a mutation closure actually changed the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Change {
    Changed,
    Unchanged,
}

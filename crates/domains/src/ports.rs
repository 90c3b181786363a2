//! # Core Traits (Ports)
//!
//! Any storage adapter must implement these traits to back the services.
//!
//! Mutating rows goes through `update`, which must only succeed when the
//! stored `version` equals the version of the entity passed in, and must
//! return the stored copy with the version bumped. A mismatch is reported as
//! [`RepositoryError::StaleVersion`]; the services retry on it.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::RepositoryError;
use crate::ids::{CommentId, PostId, TagId, UserId};
use crate::models::{Comment, Post, Tag, User};
use crate::query::{Page, PageRequest, PostFilter, PostSortField, SortOrder, UserFilter, UserSortField};

/// Persistence contract for posts, their likes and their tag links.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PostRepository: Send + Sync {
    async fn find_by_id(&self, id: PostId) -> Result<Option<Post>, RepositoryError>;
    async fn insert(&self, post: &Post) -> Result<(), RepositoryError>;
    /// Version-checked write; returns the stored copy.
    async fn update(&self, post: &Post) -> Result<Post, RepositoryError>;
    /// Removes the post together with its comments.
    async fn delete(&self, id: PostId) -> Result<(), RepositoryError>;

    // Listings, all newest first unless noted
    async fn find_recent(&self, limit: usize) -> Result<Vec<Post>, RepositoryError>;
    /// Most live comments first, ties broken by recency.
    async fn find_most_commented(&self, limit: usize) -> Result<Vec<Post>, RepositoryError>;
    async fn find_by_creator(&self, creator: UserId, limit: usize) -> Result<Vec<Post>, RepositoryError>;
    /// Case-insensitive substring match on title or content; an empty needle
    /// matches everything.
    async fn search_text(&self, needle: &str, limit: usize) -> Result<Vec<Post>, RepositoryError>;
    async fn find_by_tag(&self, tag: TagId, limit: usize) -> Result<Vec<Post>, RepositoryError>;
    async fn filter(
        &self,
        filter: &PostFilter,
        sort: SortOrder<PostSortField>,
        page: PageRequest,
    ) -> Result<Page<Post>, RepositoryError>;
}

/// Persistence contract for comments.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CommentRepository: Send + Sync {
    async fn find_by_id(&self, id: CommentId) -> Result<Option<Comment>, RepositoryError>;
    /// Fails with [`RepositoryError::Missing`] when the post is gone.
    async fn insert(&self, comment: &Comment) -> Result<(), RepositoryError>;
    async fn update(&self, comment: &Comment) -> Result<Comment, RepositoryError>;
    /// Removes the comment and every reply beneath it.
    async fn delete(&self, id: CommentId) -> Result<(), RepositoryError>;
    /// Oldest first, tombstones included.
    async fn find_by_post(&self, post: PostId) -> Result<Vec<Comment>, RepositoryError>;
    async fn find_by_post_page(&self, post: PostId, page: PageRequest) -> Result<Page<Comment>, RepositoryError>;
}

/// Persistence contract for tags. Names are unique.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TagRepository: Send + Sync {
    /// `name` is always canonical.
    async fn find_by_name(&self, name: &str) -> Result<Option<Tag>, RepositoryError>;
    async fn find_by_ids(&self, ids: &BTreeSet<TagId>) -> Result<Vec<Tag>, RepositoryError>;
    /// Fails with [`RepositoryError::UniqueViolation`] if the name is taken.
    async fn insert(&self, tag: &Tag) -> Result<(), RepositoryError>;
    /// Ordered by name.
    async fn find_all(&self) -> Result<Vec<Tag>, RepositoryError>;
}

/// Persistence contract for accounts. Usernames and emails are unique.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;
    async fn exists_by_username(&self, username: &str) -> Result<bool, RepositoryError>;
    async fn exists_by_email(&self, email: &str) -> Result<bool, RepositoryError>;
    async fn insert(&self, user: &User) -> Result<(), RepositoryError>;
    /// Version-checked write; a username or email held by another account
    /// is a [`RepositoryError::UniqueViolation`].
    async fn update(&self, user: &User) -> Result<User, RepositoryError>;
    async fn delete(&self, id: UserId) -> Result<(), RepositoryError>;
    async fn filter(
        &self,
        filter: &UserFilter,
        sort: SortOrder<UserSortField>,
        page: PageRequest,
    ) -> Result<Page<User>, RepositoryError>;
    async fn count(&self) -> Result<usize, RepositoryError>;
}

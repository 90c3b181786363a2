//! # Domain Models
//!
//! These structs represent the core entities of the forum. Every mutable
//! entity carries a `version` that repositories compare on update, so a
//! read-modify-write never silently overwrites a concurrent change.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CommentId, PostId, TagId, UserId};
use crate::tag::TagName;

/// Placeholder stored in place of the body of a redacted comment.
pub const REDACTED_CONTENT: &str = "[deleted]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Admin,
}

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Unique, compared case-sensitively by the store
    pub username: String,
    /// Unique
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub roles: BTreeSet<Role>,
    pub blocked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: u64,
}

/// Registration payload. Credentials are handled outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// Profile edits; `None` leaves the field as it is. Only admins may rename.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
}

impl User {
    /// Builds a regular, unblocked member from a registration payload.
    pub fn register(new_user: NewUser) -> Self {
        Self {
            id: UserId::generate(),
            username: new_user.username.trim().to_owned(),
            email: new_user.email.trim().to_owned(),
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            roles: BTreeSet::from([Role::User]),
            blocked: false,
            created_at: Utc::now(),
            updated_at: None,
            version: 0,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }

    /// The identity this user presents when acting.
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.id,
            roles: self.roles.clone(),
            blocked: self.blocked,
        }
    }
}

/// The authenticated identity invoking an operation.
///
/// Supplied by the caller on every call; the engine never looks it up from
/// ambient state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub roles: BTreeSet<Role>,
    pub blocked: bool,
}

impl Actor {
    pub fn new(id: UserId, roles: impl IntoIterator<Item = Role>, blocked: bool) -> Self {
        Self {
            id,
            roles: roles.into_iter().collect(),
            blocked,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        user.actor()
    }
}

/// Content with an immutable creator.
pub trait Authored {
    fn creator(&self) -> UserId;
}

/// Liking users plus the cached count shown to readers.
///
/// `add` and `remove` keep `count == users.len()`; a count that was already
/// corrupted never goes below zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Likes {
    count: u32,
    users: BTreeSet<UserId>,
}

impl Likes {
    /// Rehydrates stored state as-is, even if the two halves disagree.
    pub fn from_parts(count: u32, users: BTreeSet<UserId>) -> Self {
        Self { count, users }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn users(&self) -> &BTreeSet<UserId> {
        &self.users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.users.contains(&user)
    }

    /// Returns `false` when `user` had already liked.
    pub fn add(&mut self, user: UserId) -> bool {
        if !self.users.insert(user) {
            return false;
        }
        self.count = self.count.saturating_add(1);
        true
    }

    /// Returns `false` when `user` had not liked.
    pub fn remove(&mut self, user: UserId) -> bool {
        if !self.users.remove(&user) {
            return false;
        }
        self.count = self.count.saturating_sub(1);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub creator: UserId,
    pub title: String,
    pub content: String,
    pub likes: Likes,
    /// Post/tag join rows for this post
    pub tags: BTreeSet<TagId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Post {
    pub fn new(creator: UserId, title: &str, content: &str) -> Self {
        Self {
            id: PostId::generate(),
            creator,
            title: title.trim().to_owned(),
            content: content.trim().to_owned(),
            likes: Likes::default(),
            tags: BTreeSet::new(),
            created_at: Utc::now(),
            updated_at: None,
            version: 0,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

impl Authored for Post {
    fn creator(&self) -> UserId {
        self.creator
    }
}

/// A comment on a post, optionally replying to another comment on the same
/// post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub creator: UserId,
    pub parent_id: Option<CommentId>,
    pub content: String,
    pub likes: Likes,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Comment {
    pub fn new(post_id: PostId, creator: UserId, parent_id: Option<CommentId>, content: &str) -> Self {
        Self {
            id: CommentId::generate(),
            post_id,
            creator,
            parent_id,
            content: content.to_owned(),
            likes: Likes::default(),
            deleted_at: None,
            deleted_by: None,
            created_at: Utc::now(),
            updated_at: None,
            version: 0,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Marks the comment deleted while keeping it in the thread.
    pub fn tombstone(&mut self, deleted_by: UserId, redact: bool) {
        let now = Utc::now();
        self.deleted_at = Some(now);
        self.deleted_by = Some(deleted_by);
        self.updated_at = Some(now);
        if redact {
            self.content = REDACTED_CONTENT.to_owned();
        }
    }
}

impl Authored for Comment {
    fn creator(&self) -> UserId {
        self.creator
    }
}

/// A registered tag. Only canonical names are ever stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: TagName,
    pub created_at: DateTime<Utc>,
}

impl Tag {
    pub fn new(name: TagName) -> Self {
        Self {
            id: TagId::generate(),
            name,
            created_at: Utc::now(),
        }
    }
}

//! # In-memory store
//!
//! `DashMap`-backed implementation of every repository port. Rows carry an
//! insertion sequence number so listings stay deterministic when two rows
//! share a timestamp.
//!
//! Version-checked updates hold the row's shard lock for the compare and the
//! write, which is what makes the services' optimistic retries sound.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domains::{
    Comment, CommentId, CommentRepository, Page, PageRequest, Post, PostFilter, PostId,
    PostRepository, PostSortField, RepositoryError, SortOrder, Tag, TagId, TagRepository, User,
    UserFilter, UserId, UserRepository, UserSortField,
};
use tracing::debug;

#[derive(Debug, Clone)]
struct Row<T> {
    seq: u64,
    entity: T,
}

/// Entities whose writes are guarded by a version counter.
trait Versioned: Clone {
    const ENTITY: &'static str;

    fn version(&self) -> u64;
    fn bump(&mut self);
}

impl Versioned for Post {
    const ENTITY: &'static str = "Post";

    fn version(&self) -> u64 {
        self.version
    }

    fn bump(&mut self) {
        self.version += 1;
    }
}

impl Versioned for Comment {
    const ENTITY: &'static str = "Comment";

    fn version(&self) -> u64 {
        self.version
    }

    fn bump(&mut self) {
        self.version += 1;
    }
}

impl Versioned for User {
    const ENTITY: &'static str = "User";

    fn version(&self) -> u64 {
        self.version
    }

    fn bump(&mut self) {
        self.version += 1;
    }
}

fn update_row<K, T>(rows: &DashMap<K, Row<T>>, key: K, incoming: &T) -> Result<T, RepositoryError>
where
    K: Eq + Hash + Display,
    T: Versioned,
{
    let Some(mut row) = rows.get_mut(&key) else {
        return Err(RepositoryError::Missing {
            entity: T::ENTITY,
            id: key.to_string(),
        });
    };
    if row.entity.version() != incoming.version() {
        return Err(RepositoryError::StaleVersion {
            entity: T::ENTITY,
            id: key.to_string(),
        });
    }

    let mut stored = incoming.clone();
    stored.bump();
    row.entity = stored.clone();
    Ok(stored)
}

#[derive(Default)]
pub struct MemoryStore {
    sequence: AtomicU64,
    users: DashMap<UserId, Row<User>>,
    /// Serializes the uniqueness check and insert for usernames and emails
    user_keys: Mutex<()>,
    posts: DashMap<PostId, Row<Post>>,
    comments: DashMap<CommentId, Row<Comment>>,
    tags: DashMap<TagId, Tag>,
    tag_names: DashMap<String, TagId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Matching posts, newest first.
    fn newest_posts(&self, keep: impl Fn(&Post) -> bool) -> Vec<Post> {
        let mut rows: Vec<Row<Post>> = self
            .posts
            .iter()
            .filter(|row| keep(&row.value().entity))
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by(|a, b| {
            b.entity
                .created_at
                .cmp(&a.entity.created_at)
                .then_with(|| b.seq.cmp(&a.seq))
        });
        rows.into_iter().map(|row| row.entity).collect()
    }

    /// Comments of one post, oldest first.
    fn thread(&self, post: PostId) -> Vec<Comment> {
        let mut rows: Vec<Row<Comment>> = self
            .comments
            .iter()
            .filter(|row| row.value().entity.post_id == post)
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by(|a, b| {
            a.entity
                .created_at
                .cmp(&b.entity.created_at)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        rows.into_iter().map(|row| row.entity).collect()
    }

    fn lock_user_keys(&self) -> Result<MutexGuard<'_, ()>, RepositoryError> {
        self.user_keys
            .lock()
            .map_err(|_| RepositoryError::Backend("user index lock poisoned".into()))
    }

    /// Username and email must not belong to any other account.
    fn ensure_unique_keys(&self, user: &User) -> Result<(), RepositoryError> {
        for row in self.users.iter().filter(|row| row.entity.id != user.id) {
            if row.entity.username == user.username {
                return Err(RepositoryError::UniqueViolation("username"));
            }
            if row.entity.email == user.email {
                return Err(RepositoryError::UniqueViolation("email"));
            }
        }
        Ok(())
    }

    fn username_of(&self, id: UserId) -> String {
        self.users
            .get(&id)
            .map(|row| row.entity.username.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PostRepository for MemoryStore {
    async fn find_by_id(&self, id: PostId) -> Result<Option<Post>, RepositoryError> {
        Ok(self.posts.get(&id).map(|row| row.entity.clone()))
    }

    async fn insert(&self, post: &Post) -> Result<(), RepositoryError> {
        let seq = self.next_seq();
        match self.posts.entry(post.id) {
            Entry::Occupied(_) => Err(RepositoryError::UniqueViolation("post id")),
            Entry::Vacant(slot) => {
                slot.insert(Row {
                    seq,
                    entity: post.clone(),
                });
                Ok(())
            }
        }
    }

    async fn update(&self, post: &Post) -> Result<Post, RepositoryError> {
        update_row(&self.posts, post.id, post)
    }

    async fn delete(&self, id: PostId) -> Result<(), RepositoryError> {
        if self.posts.remove(&id).is_none() {
            return Err(RepositoryError::Missing {
                entity: "Post",
                id: id.to_string(),
            });
        }
        self.comments.retain(|_, row| row.entity.post_id != id);
        debug!(post_id = %id, "post and its comments removed");
        Ok(())
    }

    async fn find_recent(&self, limit: usize) -> Result<Vec<Post>, RepositoryError> {
        let mut posts = self.newest_posts(|_| true);
        posts.truncate(limit);
        Ok(posts)
    }

    async fn find_most_commented(&self, limit: usize) -> Result<Vec<Post>, RepositoryError> {
        let mut live: HashMap<PostId, usize> = HashMap::new();
        for row in self.comments.iter() {
            if !row.entity.is_deleted() {
                *live.entry(row.entity.post_id).or_default() += 1;
            }
        }

        // stable sort keeps the recency order among equal counts
        let mut posts = self.newest_posts(|_| true);
        posts.sort_by_key(|post| Reverse(live.get(&post.id).copied().unwrap_or(0)));
        posts.truncate(limit);
        Ok(posts)
    }

    async fn find_by_creator(&self, creator: UserId, limit: usize) -> Result<Vec<Post>, RepositoryError> {
        let mut posts = self.newest_posts(|post| post.creator == creator);
        posts.truncate(limit);
        Ok(posts)
    }

    async fn search_text(&self, needle: &str, limit: usize) -> Result<Vec<Post>, RepositoryError> {
        let needle = needle.to_lowercase();
        let mut posts = self.newest_posts(|post| {
            needle.is_empty()
                || post.title.to_lowercase().contains(&needle)
                || post.content.to_lowercase().contains(&needle)
        });
        posts.truncate(limit);
        Ok(posts)
    }

    async fn find_by_tag(&self, tag: TagId, limit: usize) -> Result<Vec<Post>, RepositoryError> {
        let mut posts = self.newest_posts(|post| post.tags.contains(&tag));
        posts.truncate(limit);
        Ok(posts)
    }

    async fn filter(
        &self,
        filter: &PostFilter,
        sort: SortOrder<PostSortField>,
        page: PageRequest,
    ) -> Result<Page<Post>, RepositoryError> {
        let mut matched: Vec<Post> = self
            .newest_posts(|_| true)
            .into_iter()
            .filter(|post| filter.matches(post, &self.username_of(post.creator)))
            .collect();
        matched.sort_by(|a, b| sort.compare(a, b));
        Ok(Page::from_sorted(matched, page))
    }
}

#[async_trait]
impl CommentRepository for MemoryStore {
    async fn find_by_id(&self, id: CommentId) -> Result<Option<Comment>, RepositoryError> {
        Ok(self.comments.get(&id).map(|row| row.entity.clone()))
    }

    async fn insert(&self, comment: &Comment) -> Result<(), RepositoryError> {
        // holding the post row keeps a concurrent post delete (and its
        // cascade) from running between the check and the insert
        let Some(_post) = self.posts.get(&comment.post_id) else {
            return Err(RepositoryError::Missing {
                entity: "Post",
                id: comment.post_id.to_string(),
            });
        };
        let seq = self.next_seq();
        match self.comments.entry(comment.id) {
            Entry::Occupied(_) => Err(RepositoryError::UniqueViolation("comment id")),
            Entry::Vacant(slot) => {
                slot.insert(Row {
                    seq,
                    entity: comment.clone(),
                });
                Ok(())
            }
        }
    }

    async fn update(&self, comment: &Comment) -> Result<Comment, RepositoryError> {
        update_row(&self.comments, comment.id, comment)
    }

    async fn delete(&self, id: CommentId) -> Result<(), RepositoryError> {
        let Some(post_id) = self.comments.get(&id).map(|row| row.entity.post_id) else {
            return Err(RepositoryError::Missing {
                entity: "Comment",
                id: id.to_string(),
            });
        };

        let edges: Vec<(CommentId, Option<CommentId>)> = self
            .comments
            .iter()
            .filter(|row| row.entity.post_id == post_id)
            .map(|row| (*row.key(), row.entity.parent_id))
            .collect();

        let mut doomed = BTreeSet::from([id]);
        let mut queue = VecDeque::from([id]);
        while let Some(parent) = queue.pop_front() {
            for (child, child_parent) in &edges {
                if *child_parent == Some(parent) && doomed.insert(*child) {
                    queue.push_back(*child);
                }
            }
        }

        for comment_id in &doomed {
            self.comments.remove(comment_id);
        }
        debug!(comment_id = %id, removed = doomed.len(), "comment subtree removed");
        Ok(())
    }

    async fn find_by_post(&self, post: PostId) -> Result<Vec<Comment>, RepositoryError> {
        Ok(self.thread(post))
    }

    async fn find_by_post_page(&self, post: PostId, page: PageRequest) -> Result<Page<Comment>, RepositoryError> {
        Ok(Page::from_sorted(self.thread(post), page))
    }
}

#[async_trait]
impl TagRepository for MemoryStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<Tag>, RepositoryError> {
        let Some(id) = self.tag_names.get(name).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.tags.get(&id).map(|tag| tag.value().clone()))
    }

    async fn find_by_ids(&self, ids: &BTreeSet<TagId>) -> Result<Vec<Tag>, RepositoryError> {
        let mut found: Vec<Tag> = ids
            .iter()
            .filter_map(|id| self.tags.get(id).map(|tag| tag.value().clone()))
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn insert(&self, tag: &Tag) -> Result<(), RepositoryError> {
        match self.tag_names.entry(tag.name.as_str().to_owned()) {
            Entry::Occupied(_) => Err(RepositoryError::UniqueViolation("tag name")),
            Entry::Vacant(slot) => {
                // row first, so a reader that sees the name also sees the tag
                self.tags.insert(tag.id, tag.clone());
                slot.insert(tag.id);
                Ok(())
            }
        }
    }

    async fn find_all(&self) -> Result<Vec<Tag>, RepositoryError> {
        let mut all: Vec<Tag> = self.tags.iter().map(|tag| tag.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.get(&id).map(|row| row.entity.clone()))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .users
            .iter()
            .find(|row| row.entity.username == username)
            .map(|row| row.entity.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .users
            .iter()
            .find(|row| row.entity.email == email)
            .map(|row| row.entity.clone()))
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, RepositoryError> {
        Ok(self.users.iter().any(|row| row.entity.username == username))
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, RepositoryError> {
        Ok(self.users.iter().any(|row| row.entity.email == email))
    }

    async fn insert(&self, user: &User) -> Result<(), RepositoryError> {
        let _guard = self.lock_user_keys()?;
        self.ensure_unique_keys(user)?;

        let seq = self.next_seq();
        self.users.insert(
            user.id,
            Row {
                seq,
                entity: user.clone(),
            },
        );
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<User, RepositoryError> {
        let _guard = self.lock_user_keys()?;
        self.ensure_unique_keys(user)?;
        update_row(&self.users, user.id, user)
    }

    async fn delete(&self, id: UserId) -> Result<(), RepositoryError> {
        match self.users.remove(&id) {
            Some(_) => Ok(()),
            None => Err(RepositoryError::Missing {
                entity: "User",
                id: id.to_string(),
            }),
        }
    }

    async fn filter(
        &self,
        filter: &UserFilter,
        sort: SortOrder<UserSortField>,
        page: PageRequest,
    ) -> Result<Page<User>, RepositoryError> {
        let mut rows: Vec<Row<User>> = self
            .users
            .iter()
            .filter(|row| filter.matches(&row.value().entity))
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by(|a, b| sort.compare(&a.entity, &b.entity).then_with(|| a.seq.cmp(&b.seq)));
        Ok(Page::from_sorted(rows.into_iter().map(|row| row.entity).collect(), page))
    }

    async fn count(&self) -> Result<usize, RepositoryError> {
        Ok(self.users.len())
    }
}

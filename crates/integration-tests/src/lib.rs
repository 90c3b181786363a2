//! Shared fixtures for the cross-crate tests: the full service stack wired
//! over one [`MemoryStore`], plus helpers that register users and create
//! posts with generated content.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use domains::{Actor, CommentDeletion, CommentSettings, NewUser, Post, Role, TagRules, User, UserRepository};
use fake::faker::internet::en::Username;
use fake::faker::lorem::en::{Paragraph, Sentence};
use fake::faker::name::en::{FirstName, LastName};
use fake::Fake;
use services::{CommentService, PostService, TagRegistry, UserService};
use storage_adapters::MemoryStore;

static NEXT_USER: AtomicUsize = AtomicUsize::new(0);

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub users: UserService,
    pub posts: PostService,
    pub comments: CommentService,
    pub tags: TagRegistry,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_comments(CommentSettings::default())
    }

    pub fn with_deletion(deletion: CommentDeletion) -> Self {
        Self::with_comments(CommentSettings {
            deletion,
            ..CommentSettings::default()
        })
    }

    pub fn with_comments(settings: CommentSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let tags = TagRegistry::new(store.clone(), TagRules::default());
        Self {
            users: UserService::new(store.clone()),
            posts: PostService::new(store.clone(), tags.clone()),
            comments: CommentService::new(store.clone(), store.clone(), settings),
            tags,
            store,
        }
    }

    /// A registration payload with a generated, collision-free username.
    pub fn new_user() -> NewUser {
        let base: String = Username().fake();
        let username = format!("{base}_{}", NEXT_USER.fetch_add(1, Ordering::Relaxed));
        NewUser {
            email: format!("{username}@example.com"),
            username,
            first_name: FirstName().fake(),
            last_name: LastName().fake(),
        }
    }

    pub async fn member(&self) -> User {
        self.users
            .register(Self::new_user())
            .await
            .expect("member registration")
    }

    /// Admins cannot be registered, so the role is written straight to the store.
    pub async fn admin(&self) -> User {
        let mut user = self.member().await;
        user.roles.insert(Role::Admin);
        UserRepository::update(self.store.as_ref(), &user)
            .await
            .expect("admin promotion")
    }

    /// Blocks `user` through a throwaway admin and returns the blocked actor.
    pub async fn blocked(&self, user: &User) -> Actor {
        let admin = self.admin().await;
        self.users
            .block(&admin.actor(), user.id)
            .await
            .expect("block user")
            .actor()
    }

    pub async fn post_by(&self, author: &User) -> Post {
        let title: String = Sentence(3..6).fake();
        let content: String = Paragraph(1..3).fake();
        self.posts
            .create(&author.actor(), &title, &content)
            .await
            .expect("create post")
    }
}

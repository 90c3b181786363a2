//! # Seed
//!
//! Builds the engine over the in-memory store, plays a short forum session
//! (an admin, two members, posts, tags, comments, likes) and logs what ended
//! up in the store.
//!
//! `FORUM_CONFIG` points at an alternative config file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use configs::{ForumConfig, LoggingSettings};
use domains::{NewUser, Role, User, UserRepository};
use services::{CommentService, PostService, TagRegistry, UserService};
use storage_adapters::MemoryStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if settings.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn new_user(username: &str, first_name: &str, last_name: &str) -> NewUser {
    NewUser {
        username: username.into(),
        email: format!("{username}@forum.local"),
        first_name: first_name.into(),
        last_name: last_name.into(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var_os("FORUM_CONFIG").map(PathBuf::from);
    let config = ForumConfig::load(config_path.as_deref()).context("loading configuration")?;
    init_tracing(&config.logging);

    let store = Arc::new(MemoryStore::new());
    let tags = TagRegistry::new(store.clone(), config.tags);
    let users = UserService::new(store.clone());
    let posts = PostService::new(store.clone(), tags.clone());
    let comments = CommentService::new(store.clone(), store.clone(), config.comments);

    // 1. Accounts. Nobody can promote the first admin, so it is written directly.
    let mut root = User::register(new_user("admin", "Ada", "Admin"));
    root.roles.insert(Role::Admin);
    UserRepository::insert(store.as_ref(), &root)
        .await
        .context("storing bootstrap admin")?;
    let admin = root.actor();

    let alice = users.register(new_user("alice", "Alice", "Liddell")).await?.actor();
    let bob = users.register(new_user("bob", "Bob", "Builder")).await?.actor();

    // 2. Posts and tags
    let intro = posts
        .create(&alice, "Getting started with async Rust", "Which runtime should I pick first?")
        .await?;
    let crates = posts
        .create(&bob, "Favourite crates of the year", "Share the crates you could not live without.")
        .await?;
    posts.add_tags(intro.id, &alice, &["Rust", "async await"]).await?;
    posts.add_tags(crates.id, &bob, &["rust", "Crates"]).await?;

    // 3. Discussion
    let question = comments
        .create(intro.id, &bob, "Start with tokio, most of the ecosystem assumes it.", None)
        .await?;
    comments
        .create(intro.id, &alice, "Thanks, that settles it.", Some(question.id))
        .await?;
    comments
        .create(crates.id, &admin, "Pinning this for the end of the year.", None)
        .await?;

    // 4. Likes
    posts.like(intro.id, &bob).await?;
    posts.like(intro.id, &admin).await?;
    posts.like(crates.id, &alice).await?;
    comments.like(question.id, &alice).await?;

    // 5. Summary
    let top = posts.top_commented(1).await?;
    let intro = posts.get_by_id(intro.id).await?;
    info!(
        users = users.count().await?,
        posts = posts.most_recent(50).await?.len(),
        tags = tags.all().await?.len(),
        "seed complete"
    );
    if let Some(post) = top.first() {
        info!(title = %post.title, "most discussed post");
    }
    info!(
        title = %intro.title,
        likes = intro.likes.count(),
        comments = comments.list_by_post(intro.id).await?.len(),
        "first post"
    );

    Ok(())
}

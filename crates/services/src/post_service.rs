//! # Post Service
//!
//! Create, edit, delete, like and tag posts, plus the public read side.
//! Writes follow load → authorize → mutate → versioned update, and re-run on
//! a stale version so concurrent likes never lose an increment.

use std::collections::BTreeSet;
use std::sync::Arc;

use domains::{
    clamp_limit, trim_to_limit, Actor, AppError, Page, PageRequest, Post, PostFilter, PostId,
    PostRepository, PostSortField, RepositoryError, Result, SortOrder, Tag, UserId,
};
use tracing::{debug, info, instrument};

use crate::policy;
use crate::tag_registry::TagRegistry;
use crate::{Change, MAX_WRITE_ATTEMPTS};

pub struct PostService {
    posts: Arc<dyn PostRepository>,
    tags: TagRegistry,
}

impl PostService {
    pub fn new(posts: Arc<dyn PostRepository>, tags: TagRegistry) -> Self {
        Self { posts, tags }
    }

    pub fn tags(&self) -> &TagRegistry {
        &self.tags
    }

    async fn load(&self, id: PostId) -> Result<Post> {
        self.posts
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("Post", "id", id))
    }

    /// Applies `apply` to a fresh copy of the post and persists it, retrying
    /// when another writer got there first.
    async fn modify<F>(&self, id: PostId, mut apply: F) -> Result<Post>
    where
        F: FnMut(&mut Post) -> Result<Change> + Send,
    {
        let mut attempt = 1;
        loop {
            let mut post = self.load(id).await?;
            if apply(&mut post)? == Change::Unchanged {
                return Ok(post);
            }
            match self.posts.update(&post).await {
                Ok(stored) => return Ok(stored),
                Err(RepositoryError::StaleVersion { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!(post_id = %id, attempt, "post changed concurrently, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    // Post Operations

    #[instrument(skip_all, fields(actor_id = %actor.id))]
    pub async fn create(&self, actor: &Actor, title: &str, content: &str) -> Result<Post> {
        policy::can_act(actor).require()?;

        let post = Post::new(actor.id, title, content);
        self.posts.insert(&post).await?;

        info!(post_id = %post.id, "post created");
        Ok(post)
    }

    /// `None` leaves a field as it is; `Some` is trimmed and replaces it.
    #[instrument(skip(self, actor, title, content), fields(actor_id = %actor.id))]
    pub async fn edit(
        &self,
        post_id: PostId,
        actor: &Actor,
        title: Option<&str>,
        content: Option<&str>,
    ) -> Result<Post> {
        let post = self
            .modify(post_id, |post| {
                policy::can_modify(actor, post).require()?;

                let mut change = Change::Unchanged;
                if let Some(title) = title {
                    post.title = title.trim().to_owned();
                    change = Change::Changed;
                }
                if let Some(content) = content {
                    post.content = content.trim().to_owned();
                    change = Change::Changed;
                }
                if change == Change::Changed {
                    post.touch();
                }
                Ok(change)
            })
            .await?;

        info!("post edited");
        Ok(post)
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn delete(&self, post_id: PostId, actor: &Actor) -> Result<()> {
        let post = self.load(post_id).await?;
        policy::can_modify(actor, &post).require()?;

        self.posts.delete(post_id).await?;
        info!("post deleted");
        Ok(())
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn admin_delete(&self, post_id: PostId, actor: &Actor) -> Result<()> {
        policy::can_administer(actor).require()?;
        self.load(post_id).await?;

        self.posts.delete(post_id).await?;
        info!("post deleted by admin");
        Ok(())
    }

    // Likes

    /// Liking twice is a no-op; liking your own post is refused.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn like(&self, post_id: PostId, actor: &Actor) -> Result<Post> {
        policy::can_act(actor).require()?;

        self.modify(post_id, |post| {
            policy::can_like(actor, post).require()?;
            if post.likes.add(actor.id) {
                info!(likes = post.likes.count(), "post liked");
                Ok(Change::Changed)
            } else {
                debug!("post already liked");
                Ok(Change::Unchanged)
            }
        })
        .await
    }

    /// Unliking a post you never liked is a no-op.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn unlike(&self, post_id: PostId, actor: &Actor) -> Result<Post> {
        self.modify(post_id, |post| {
            if post.likes.remove(actor.id) {
                info!(likes = post.likes.count(), "post unliked");
                Ok(Change::Changed)
            } else {
                debug!("post was not liked");
                Ok(Change::Unchanged)
            }
        })
        .await
    }

    // Tags

    /// Attaches tags by raw name.
    ///
    /// Every name is normalized before anything is written, so one invalid
    /// name rejects the whole call.
    #[instrument(skip(self, actor, raw_names), fields(actor_id = %actor.id, count = raw_names.len()))]
    pub async fn add_tags<S>(&self, post_id: PostId, actor: &Actor, raw_names: &[S]) -> Result<Post>
    where
        S: AsRef<str> + Sync,
    {
        let post = self.load(post_id).await?;
        policy::can_modify(actor, &post).require()?;

        if raw_names.is_empty() {
            return Ok(post);
        }

        let names = raw_names
            .iter()
            .map(|raw| self.tags.normalize(raw.as_ref()))
            .collect::<Result<BTreeSet<_>>>()?;

        let mut tag_ids = BTreeSet::new();
        for name in names {
            tag_ids.insert(self.tags.resolve(name).await?.id);
        }

        self.modify(post_id, |post| {
            policy::can_modify(actor, post).require()?;
            let before = post.tags.len();
            post.tags.extend(tag_ids.iter().copied());
            if post.tags.len() == before {
                return Ok(Change::Unchanged);
            }
            post.touch();
            info!(tags = post.tags.len(), "tags attached");
            Ok(Change::Changed)
        })
        .await
    }

    /// Detaches a tag. The tag must be registered; the post need not carry it.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn remove_tag(&self, post_id: PostId, actor: &Actor, raw_name: &str) -> Result<Post> {
        let post = self.load(post_id).await?;
        policy::can_modify(actor, &post).require()?;

        let tag = self.tags.get_by_name(raw_name).await?;

        self.modify(post_id, |post| {
            policy::can_modify(actor, post).require()?;
            if !post.tags.remove(&tag.id) {
                return Ok(Change::Unchanged);
            }
            post.touch();
            info!(tag = %tag.name, "tag detached");
            Ok(Change::Changed)
        })
        .await
    }

    // Queries

    pub async fn get_by_id(&self, id: PostId) -> Result<Post> {
        self.load(id).await
    }

    pub async fn most_recent(&self, limit: usize) -> Result<Vec<Post>> {
        let limit = clamp_limit(limit);
        Ok(trim_to_limit(self.posts.find_recent(limit).await?, limit))
    }

    pub async fn top_commented(&self, limit: usize) -> Result<Vec<Post>> {
        let limit = clamp_limit(limit);
        Ok(trim_to_limit(self.posts.find_most_commented(limit).await?, limit))
    }

    pub async fn find_by_creator(&self, creator: UserId, limit: usize) -> Result<Vec<Post>> {
        let limit = clamp_limit(limit);
        Ok(trim_to_limit(self.posts.find_by_creator(creator, limit).await?, limit))
    }

    /// `None` or blank text matches every post, newest first.
    pub async fn search(&self, text: Option<&str>, limit: usize) -> Result<Vec<Post>> {
        let limit = clamp_limit(limit);
        let needle = text.map(str::trim).unwrap_or_default();
        Ok(trim_to_limit(self.posts.search_text(needle, limit).await?, limit))
    }

    /// Posts carrying the tag; an unregistered tag simply has none.
    pub async fn find_by_tag(&self, raw_name: &str, limit: usize) -> Result<Vec<Post>> {
        let limit = clamp_limit(limit);
        match self.tags.find_by_name(raw_name).await? {
            Some(tag) => Ok(trim_to_limit(self.posts.find_by_tag(tag.id, limit).await?, limit)),
            None => Ok(Vec::new()),
        }
    }

    pub async fn filter(
        &self,
        criteria: &PostFilter,
        sort: SortOrder<PostSortField>,
        page: PageRequest,
    ) -> Result<Page<Post>> {
        let page = PageRequest::new(page.page, page.size);
        Ok(self.posts.filter(criteria, sort, page).await?)
    }

    pub async fn tags_of(&self, post: &Post) -> Result<Vec<Tag>> {
        self.tags.by_ids(&post.tags).await
    }
}

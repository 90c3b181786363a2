//! # Comment Service
//!
//! Threaded comments on posts. Deletion is either a tombstone that keeps the
//! comment (and its replies) in the thread, or a hard removal of the comment
//! and everything beneath it, depending on [`CommentSettings`].

use std::sync::Arc;

use chrono::Utc;
use domains::{
    Actor, AppError, Comment, CommentDeletion, CommentId, CommentRepository, CommentSettings,
    DenyReason, Page, PageRequest, PostId, PostRepository, RepositoryError, Result,
};
use tracing::{debug, info, instrument};

use crate::policy::{self, Decision};
use crate::{Change, MAX_WRITE_ATTEMPTS};

pub struct CommentService {
    comments: Arc<dyn CommentRepository>,
    posts: Arc<dyn PostRepository>,
    settings: CommentSettings,
}

impl CommentService {
    pub fn new(
        comments: Arc<dyn CommentRepository>,
        posts: Arc<dyn PostRepository>,
        settings: CommentSettings,
    ) -> Self {
        Self {
            comments,
            posts,
            settings,
        }
    }

    pub fn settings(&self) -> CommentSettings {
        self.settings
    }

    async fn load(&self, id: CommentId) -> Result<Comment> {
        self.comments
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("Comment", "id", id))
    }

    async fn ensure_post(&self, post_id: PostId) -> Result<()> {
        match self.posts.find_by_id(post_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::not_found("Post", "id", post_id)),
        }
    }

    async fn modify<F>(&self, id: CommentId, mut apply: F) -> Result<Comment>
    where
        F: FnMut(&mut Comment) -> Result<Change> + Send,
    {
        let mut attempt = 1;
        loop {
            let mut comment = self.load(id).await?;
            if apply(&mut comment)? == Change::Unchanged {
                return Ok(comment);
            }
            match self.comments.update(&comment).await {
                Ok(stored) => return Ok(stored),
                Err(RepositoryError::StaleVersion { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!(comment_id = %id, attempt, "comment changed concurrently, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    #[instrument(skip(self, actor, content), fields(actor_id = %actor.id))]
    pub async fn create(
        &self,
        post_id: PostId,
        actor: &Actor,
        content: &str,
        parent_id: Option<CommentId>,
    ) -> Result<Comment> {
        policy::can_act(actor).require()?;
        self.ensure_post(post_id).await?;

        if let Some(parent_id) = parent_id {
            let parent = self.load(parent_id).await?;
            if parent.post_id != post_id {
                Decision::Deny(DenyReason::WrongPostReply).require()?;
            }
        }

        let comment = Comment::new(post_id, actor.id, parent_id, content);
        self.comments.insert(&comment).await?;

        info!(comment_id = %comment.id, "comment created");
        Ok(comment)
    }

    #[instrument(skip(self, actor, content), fields(actor_id = %actor.id))]
    pub async fn edit(&self, comment_id: CommentId, actor: &Actor, content: &str) -> Result<Comment> {
        let comment = self
            .modify(comment_id, |comment| {
                policy::can_modify(actor, comment).require()?;
                if comment.is_deleted() {
                    Decision::Deny(DenyReason::Tombstoned).require()?;
                }
                comment.content = content.to_owned();
                comment.updated_at = Some(Utc::now());
                Ok(Change::Changed)
            })
            .await?;

        info!("comment edited");
        Ok(comment)
    }

    /// Owner-or-admin deletion. Returns the comment as it stands afterwards,
    /// or as it stood before removal under hard deletion.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn delete(&self, comment_id: CommentId, actor: &Actor) -> Result<Comment> {
        self.remove(comment_id, actor, |comment| policy::can_modify(actor, comment))
            .await
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn admin_delete(&self, comment_id: CommentId, actor: &Actor) -> Result<Comment> {
        policy::can_administer(actor).require()?;
        self.remove(comment_id, actor, |_| Decision::Allow).await
    }

    async fn remove<P>(&self, comment_id: CommentId, actor: &Actor, permit: P) -> Result<Comment>
    where
        P: Fn(&Comment) -> Decision + Send + Sync,
    {
        match self.settings.deletion {
            CommentDeletion::Hard => {
                let comment = self.load(comment_id).await?;
                permit(&comment).require()?;
                self.comments.delete(comment_id).await?;
                info!("comment removed with its replies");
                Ok(comment)
            }
            CommentDeletion::Soft => {
                let redact = self.settings.redact_content;
                self.modify(comment_id, |comment| {
                    permit(comment).require()?;
                    if comment.is_deleted() {
                        debug!("comment already deleted");
                        return Ok(Change::Unchanged);
                    }
                    comment.tombstone(actor.id, redact);
                    info!("comment tombstoned");
                    Ok(Change::Changed)
                })
                .await
            }
        }
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn like(&self, comment_id: CommentId, actor: &Actor) -> Result<Comment> {
        policy::can_act(actor).require()?;

        self.modify(comment_id, |comment| {
            policy::can_like(actor, comment).require()?;
            if comment.is_deleted() {
                Decision::Deny(DenyReason::Tombstoned).require()?;
            }
            if comment.likes.add(actor.id) {
                info!(likes = comment.likes.count(), "comment liked");
                Ok(Change::Changed)
            } else {
                debug!("comment already liked");
                Ok(Change::Unchanged)
            }
        })
        .await
    }

    /// Runs no permission checks at all: unliking only ever undoes the
    /// caller's own like.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn unlike(&self, comment_id: CommentId, actor: &Actor) -> Result<Comment> {
        self.modify(comment_id, |comment| {
            if comment.likes.remove(actor.id) {
                info!(likes = comment.likes.count(), "comment unliked");
                Ok(Change::Changed)
            } else {
                debug!("comment was not liked");
                Ok(Change::Unchanged)
            }
        })
        .await
    }

    pub async fn get_by_id(&self, id: CommentId) -> Result<Comment> {
        self.load(id).await
    }

    /// Flat thread, oldest first, tombstones included.
    pub async fn list_by_post(&self, post_id: PostId) -> Result<Vec<Comment>> {
        self.ensure_post(post_id).await?;
        Ok(self.comments.find_by_post(post_id).await?)
    }

    pub async fn list_by_post_page(&self, post_id: PostId, page: PageRequest) -> Result<Page<Comment>> {
        self.ensure_post(post_id).await?;
        let page = PageRequest::new(page.page, page.size);
        Ok(self.comments.find_by_post_page(post_id, page).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::{MockCommentRepository, MockPostRepository, Post, Role, UserId, REDACTED_CONTENT};

    fn member() -> Actor {
        Actor::new(UserId::generate(), [Role::User], false)
    }

    fn admin() -> Actor {
        Actor::new(UserId::generate(), [Role::User, Role::Admin], false)
    }

    fn existing_post() -> (Post, MockPostRepository) {
        let post = Post::new(UserId::generate(), "title", "content");
        let copy = post.clone();
        let mut posts = MockPostRepository::new();
        posts
            .expect_find_by_id()
            .returning(move |_| Ok(Some(copy.clone())));
        (post, posts)
    }

    fn serving(comment: &Comment) -> MockCommentRepository {
        let comment = comment.clone();
        let mut comments = MockCommentRepository::new();
        comments
            .expect_find_by_id()
            .returning(move |_| Ok(Some(comment.clone())));
        comments
    }

    fn bump(comment: &Comment) -> std::result::Result<Comment, RepositoryError> {
        let mut stored = comment.clone();
        stored.version += 1;
        Ok(stored)
    }

    fn service(comments: MockCommentRepository, posts: MockPostRepository, deletion: CommentDeletion) -> CommentService {
        CommentService::new(
            Arc::new(comments),
            Arc::new(posts),
            CommentSettings {
                deletion,
                redact_content: true,
            },
        )
    }

    #[tokio::test]
    async fn create_on_missing_post_is_not_found() {
        let mut posts = MockPostRepository::new();
        posts.expect_find_by_id().returning(|_| Ok(None));
        let mut comments = MockCommentRepository::new();
        comments.expect_insert().never();
        let post_id = PostId::generate();

        let err = service(comments, posts, CommentDeletion::Soft)
            .create(post_id, &member(), "hello", None)
            .await
            .unwrap_err();
        assert_eq!(err, AppError::not_found("Post", "id", post_id));
    }

    #[tokio::test]
    async fn reply_to_other_posts_comment_is_forbidden() {
        let (post, posts) = existing_post();
        let elsewhere = Comment::new(PostId::generate(), UserId::generate(), None, "elsewhere");
        let mut comments = serving(&elsewhere);
        comments.expect_insert().never();

        let err = service(comments, posts, CommentDeletion::Soft)
            .create(post.id, &member(), "reply", Some(elsewhere.id))
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Forbidden(DenyReason::WrongPostReply));
    }

    #[tokio::test]
    async fn reply_on_same_post_is_stored_with_parent() {
        let (post, posts) = existing_post();
        let parent = Comment::new(post.id, UserId::generate(), None, "parent");
        let mut comments = serving(&parent);
        comments.expect_insert().times(1).returning(|_| Ok(()));
        let replier = member();

        let reply = service(comments, posts, CommentDeletion::Soft)
            .create(post.id, &replier, "reply", Some(parent.id))
            .await
            .unwrap();
        assert_eq!(reply.parent_id, Some(parent.id));
        assert_eq!(reply.creator, replier.id);
    }

    #[tokio::test]
    async fn edit_of_tombstone_is_forbidden() {
        let owner = member();
        let mut comment = Comment::new(PostId::generate(), owner.id, None, "hello");
        comment.tombstone(owner.id, false);
        let mut comments = serving(&comment);
        comments.expect_update().never();

        let err = service(comments, MockPostRepository::new(), CommentDeletion::Soft)
            .edit(comment.id, &owner, "again")
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Forbidden(DenyReason::Tombstoned));
    }

    #[tokio::test]
    async fn soft_delete_tombstones_and_redacts() {
        let owner = member();
        let comment = Comment::new(PostId::generate(), owner.id, None, "hello");
        let mut comments = serving(&comment);
        comments.expect_update().times(1).returning(bump);
        comments.expect_delete().never();

        let deleted = service(comments, MockPostRepository::new(), CommentDeletion::Soft)
            .delete(comment.id, &owner)
            .await
            .unwrap();
        assert!(deleted.is_deleted());
        assert_eq!(deleted.deleted_by, Some(owner.id));
        assert_eq!(deleted.content, REDACTED_CONTENT);
    }

    #[tokio::test]
    async fn soft_delete_of_tombstone_is_a_no_op() {
        let owner = member();
        let mut comment = Comment::new(PostId::generate(), owner.id, None, "hello");
        comment.tombstone(owner.id, true);
        let mut comments = serving(&comment);
        comments.expect_update().never();

        let same = service(comments, MockPostRepository::new(), CommentDeletion::Soft)
            .delete(comment.id, &owner)
            .await
            .unwrap();
        assert_eq!(same, comment);
    }

    #[tokio::test]
    async fn hard_delete_removes_row() {
        let comment = Comment::new(PostId::generate(), UserId::generate(), None, "hello");
        let id = comment.id;
        let mut comments = serving(&comment);
        comments
            .expect_delete()
            .withf(move |deleted: &CommentId| *deleted == id)
            .times(1)
            .returning(|_| Ok(()));
        comments.expect_update().never();

        service(comments, MockPostRepository::new(), CommentDeletion::Hard)
            .admin_delete(id, &admin())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stranger_cannot_delete() {
        let comment = Comment::new(PostId::generate(), UserId::generate(), None, "hello");
        let mut comments = serving(&comment);
        comments.expect_update().never();

        let err = service(comments, MockPostRepository::new(), CommentDeletion::Soft)
            .delete(comment.id, &member())
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Forbidden(DenyReason::NotOwnerOrAdmin));
    }

    #[tokio::test]
    async fn admin_delete_requires_admin() {
        let mut comments = MockCommentRepository::new();
        comments.expect_find_by_id().never();

        let err = service(comments, MockPostRepository::new(), CommentDeletion::Hard)
            .admin_delete(CommentId::generate(), &member())
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Forbidden(DenyReason::AdminOnly));
    }

    #[tokio::test]
    async fn like_own_comment_is_forbidden() {
        let owner = member();
        let comment = Comment::new(PostId::generate(), owner.id, None, "hello");
        let mut comments = serving(&comment);
        comments.expect_update().never();

        let err = service(comments, MockPostRepository::new(), CommentDeletion::Soft)
            .like(comment.id, &owner)
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Forbidden(DenyReason::SelfLike));
    }

    #[tokio::test]
    async fn like_of_tombstone_is_forbidden() {
        let mut comment = Comment::new(PostId::generate(), UserId::generate(), None, "hello");
        comment.tombstone(comment.creator, true);
        let mut comments = serving(&comment);
        comments.expect_update().never();

        let err = service(comments, MockPostRepository::new(), CommentDeletion::Soft)
            .like(comment.id, &member())
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Forbidden(DenyReason::Tombstoned));
    }

    #[tokio::test]
    async fn unlike_skips_every_check() {
        let mut blocked = member();
        blocked.blocked = true;
        let mut comment = Comment::new(PostId::generate(), UserId::generate(), None, "hello");
        comment.likes.add(blocked.id);
        let mut comments = serving(&comment);
        comments.expect_update().times(1).returning(bump);

        let unliked = service(comments, MockPostRepository::new(), CommentDeletion::Soft)
            .unlike(comment.id, &blocked)
            .await
            .unwrap();
        assert_eq!(unliked.likes.count(), 0);
    }

    #[tokio::test]
    async fn unlike_never_liked_is_silent() {
        let comment = Comment::new(PostId::generate(), UserId::generate(), None, "hello");
        let mut comments = serving(&comment);
        comments.expect_update().never();

        let same = service(comments, MockPostRepository::new(), CommentDeletion::Soft)
            .unlike(comment.id, &member())
            .await
            .unwrap();
        assert_eq!(same.likes.count(), 0);
    }

    #[tokio::test]
    async fn listing_missing_post_is_not_found() {
        let mut posts = MockPostRepository::new();
        posts.expect_find_by_id().returning(|_| Ok(None));
        let mut comments = MockCommentRepository::new();
        comments.expect_find_by_post().never();

        let err = service(comments, posts, CommentDeletion::Soft)
            .list_by_post(PostId::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { entity: "Post", .. }));
    }
}

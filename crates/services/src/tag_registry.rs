//! # Tag Registry
//!
//! Find-or-create over the tag store. Two requests racing to create the same
//! new tag both end up with the row that won: the loser sees a unique-name
//! violation and looks the name up again.

use std::collections::BTreeSet;
use std::sync::Arc;

use domains::{AppError, RepositoryError, Result, Tag, TagId, TagName, TagRepository, TagRules};
use tracing::{debug, info, instrument};

#[derive(Clone)]
pub struct TagRegistry {
    tags: Arc<dyn TagRepository>,
    rules: TagRules,
}

impl TagRegistry {
    pub fn new(tags: Arc<dyn TagRepository>, rules: TagRules) -> Self {
        Self { tags, rules }
    }

    pub fn rules(&self) -> TagRules {
        self.rules
    }

    pub fn normalize(&self, raw: &str) -> Result<TagName> {
        self.rules.normalize(raw)
    }

    /// Normalizes `raw` and returns the registered tag, creating it if needed.
    pub async fn find_or_create(&self, raw: &str) -> Result<Tag> {
        let name = self.normalize(raw)?;
        self.resolve(name).await
    }

    /// Find-or-create for a name that is already canonical.
    #[instrument(skip(self, name), fields(tag = %name))]
    pub async fn resolve(&self, name: TagName) -> Result<Tag> {
        if let Some(tag) = self.tags.find_by_name(name.as_str()).await? {
            return Ok(tag);
        }

        let tag = Tag::new(name);
        match self.tags.insert(&tag).await {
            Ok(()) => {
                info!(tag_id = %tag.id, "tag created");
                Ok(tag)
            }
            Err(RepositoryError::UniqueViolation(_)) => {
                debug!("lost tag creation race, re-reading");
                self.tags
                    .find_by_name(tag.name.as_str())
                    .await?
                    .ok_or_else(|| AppError::Conflict(format!("tag '{}' could not be created", tag.name)))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Read-side lookup; never creates.
    pub async fn get_by_name(&self, raw: &str) -> Result<Tag> {
        let name = self.normalize(raw)?;
        self.tags
            .find_by_name(name.as_str())
            .await?
            .ok_or_else(|| AppError::not_found("Tag", "name", name))
    }

    pub async fn find_by_name(&self, raw: &str) -> Result<Option<Tag>> {
        let name = self.normalize(raw)?;
        Ok(self.tags.find_by_name(name.as_str()).await?)
    }

    pub async fn by_ids(&self, ids: &BTreeSet<TagId>) -> Result<Vec<Tag>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.tags.find_by_ids(ids).await?)
    }

    pub async fn all(&self) -> Result<Vec<Tag>> {
        Ok(self.tags.find_all().await?)
    }
}

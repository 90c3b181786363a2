//! # Queries
//!
//! Result caps, pagination, sort orders and the filter predicates shared by
//! services and store adapters.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{Post, User};

/// Hard cap on any list a read operation returns.
pub const MAX_RESULTS: usize = 50;

/// Clamps a caller-supplied limit into `[1, MAX_RESULTS]`.
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_RESULTS)
}

/// Drops everything past the clamped limit.
pub fn trim_to_limit<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    items.truncate(clamp_limit(limit));
    items
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Self::Asc => ordering,
            Self::Desc => ordering.reverse(),
        }
    }
}

/// A field a listing can be sorted by.
pub trait SortField: Copy + Sized {
    const DEFAULT: Self;

    fn parse_field(raw: &str) -> Option<Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostSortField {
    CreatedAt,
    Likes,
    Title,
}

impl SortField for PostSortField {
    const DEFAULT: Self = Self::CreatedAt;

    fn parse_field(raw: &str) -> Option<Self> {
        match raw.replace('_', "").to_ascii_lowercase().as_str() {
            "createdat" => Some(Self::CreatedAt),
            "likes" | "likescount" => Some(Self::Likes),
            "title" => Some(Self::Title),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSortField {
    CreatedAt,
    Username,
}

impl SortField for UserSortField {
    const DEFAULT: Self = Self::CreatedAt;

    fn parse_field(raw: &str) -> Option<Self> {
        match raw.replace('_', "").to_ascii_lowercase().as_str() {
            "createdat" => Some(Self::CreatedAt),
            "username" => Some(Self::Username),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder<F> {
    pub field: F,
    pub direction: SortDirection,
}

impl<F: SortField> Default for SortOrder<F> {
    fn default() -> Self {
        Self {
            field: F::DEFAULT,
            direction: SortDirection::Desc,
        }
    }
}

impl<F: SortField> SortOrder<F> {
    /// Parses `"field"` or `"field,direction"`.
    ///
    /// Blank input yields the default (newest first); a missing direction
    /// means descending.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        let raw = match raw.map(str::trim) {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Ok(Self::default()),
        };

        let mut parts = raw.splitn(2, ',');
        let field_raw = parts.next().unwrap_or_default().trim();
        let field = F::parse_field(field_raw)
            .ok_or_else(|| AppError::InvalidFormat(format!("unknown sort field '{field_raw}'")))?;

        let direction = match parts.next().map(str::trim) {
            None | Some("") => SortDirection::Desc,
            Some(dir) if dir.eq_ignore_ascii_case("asc") => SortDirection::Asc,
            Some(dir) if dir.eq_ignore_ascii_case("desc") => SortDirection::Desc,
            Some(dir) => {
                return Err(AppError::InvalidFormat(format!("unknown sort direction '{dir}'")));
            }
        };

        Ok(Self { field, direction })
    }
}

impl SortOrder<PostSortField> {
    /// Orders two posts; ties fall back to newest first.
    pub fn compare(&self, a: &Post, b: &Post) -> Ordering {
        let primary = match self.field {
            PostSortField::CreatedAt => a.created_at.cmp(&b.created_at),
            PostSortField::Likes => a.likes.count().cmp(&b.likes.count()),
            PostSortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
        };
        self.direction
            .apply(primary)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| b.id.cmp(&a.id))
    }
}

impl SortOrder<UserSortField> {
    pub fn compare(&self, a: &User, b: &User) -> Ordering {
        let primary = match self.field {
            UserSortField::CreatedAt => a.created_at.cmp(&b.created_at),
            UserSortField::Username => a.username.to_lowercase().cmp(&b.username.to_lowercase()),
        };
        self.direction.apply(primary).then_with(|| a.id.cmp(&b.id))
    }
}

/// Zero-based page coordinates. The size is clamped like any other limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
}

impl PageRequest {
    pub fn new(page: usize, size: usize) -> Self {
        Self {
            page,
            size: clamp_limit(size),
        }
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, 10)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub size: usize,
    /// Matching items across all pages
    pub total: usize,
}

impl<T> Page<T> {
    /// Cuts one page out of an already sorted result set.
    pub fn from_sorted(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len();
        let items = all
            .into_iter()
            .skip(request.offset())
            .take(request.size)
            .collect();
        Self {
            items,
            page: request.page,
            size: request.size,
            total,
        }
    }

    pub fn total_pages(&self) -> usize {
        if self.size == 0 {
            return 0;
        }
        self.total.div_ceil(self.size)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total: self.total,
        }
    }
}

fn contains_ignore_case(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

fn lowered(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_lowercase)
}

/// Free-text post filter over creator username, title and content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostFilter {
    pub text: Option<String>,
}

impl PostFilter {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }

    /// Blank text matches every post.
    pub fn matches(&self, post: &Post, creator_username: &str) -> bool {
        match lowered(&self.text) {
            None => true,
            Some(needle) => {
                contains_ignore_case(creator_username, &needle)
                    || contains_ignore_case(&post.title, &needle)
                    || contains_ignore_case(&post.content, &needle)
            }
        }
    }
}

/// Admin user search; every supplied criterion must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFilter {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        let check = |criterion: &Option<String>, value: &str| match lowered(criterion) {
            None => true,
            Some(needle) => contains_ignore_case(value, &needle),
        };
        check(&self.username, &user.username)
            && check(&self.email, &user.email)
            && check(&self.first_name, &user.first_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::UserId;
    use crate::models::NewUser;

    #[test]
    fn limits_are_clamped_into_range() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(10), 10);
        assert_eq!(clamp_limit(1000), MAX_RESULTS);
        assert_eq!(trim_to_limit((0..100).collect::<Vec<_>>(), 1000).len(), MAX_RESULTS);
    }

    #[test]
    fn sort_parsing() {
        let default = SortOrder::<PostSortField>::parse(None).unwrap();
        assert_eq!(default.field, PostSortField::CreatedAt);
        assert_eq!(default.direction, SortDirection::Desc);

        let title = SortOrder::<PostSortField>::parse(Some("title,asc")).unwrap();
        assert_eq!(title.field, PostSortField::Title);
        assert_eq!(title.direction, SortDirection::Asc);

        let likes = SortOrder::<PostSortField>::parse(Some("likesCount")).unwrap();
        assert_eq!(likes.field, PostSortField::Likes);
        assert_eq!(likes.direction, SortDirection::Desc);

        assert!(SortOrder::<PostSortField>::parse(Some("password")).is_err());
        assert!(SortOrder::<UserSortField>::parse(Some("username,sideways")).is_err());
    }

    #[test]
    fn page_slicing_reports_total() {
        let page = Page::from_sorted((0..23).collect::<Vec<_>>(), PageRequest::new(2, 10));
        assert_eq!(page.items, vec![20, 21, 22]);
        assert_eq!(page.total, 23);
        assert_eq!(page.total_pages(), 3);
    }

    #[test]
    fn post_filter_checks_username_title_and_content() {
        let post = Post::new(UserId::generate(), "Borrow checker tips", "Lifetimes explained");
        assert!(PostFilter::text("BORROW").matches(&post, "ferris"));
        assert!(PostFilter::text("lifetimes").matches(&post, "ferris"));
        assert!(PostFilter::text("ferr").matches(&post, "ferris"));
        assert!(!PostFilter::text("python").matches(&post, "ferris"));
        assert!(PostFilter::default().matches(&post, "ferris"));
    }

    #[test]
    fn user_filter_requires_all_criteria() {
        let user = User::register(NewUser {
            username: "ferris".into(),
            email: "ferris@rust-lang.org".into(),
            first_name: "Ferris".into(),
            last_name: "Crab".into(),
        });
        let both = UserFilter {
            username: Some("FER".into()),
            email: Some("rust-lang".into()),
            first_name: None,
        };
        assert!(both.matches(&user));

        let mismatch = UserFilter {
            email: Some("example.com".into()),
            ..both
        };
        assert!(!mismatch.matches(&user));
    }
}

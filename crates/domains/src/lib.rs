//! forum/crates/domains/src/lib.rs
//!
//! The domain types and port definitions for the forum engine. Nothing in
//! this crate performs I/O; adapters implement the traits in [`ports`].

pub mod error;
pub mod ids;
pub mod models;
pub mod ports;
pub mod query;
pub mod settings;
pub mod tag;

// Re-exporting for easier access in other crates
pub use error::*;
pub use ids::*;
pub use models::*;
pub use ports::*;
pub use query::*;
pub use settings::*;
pub use tag::*;

#[cfg(test)]
mod tests {
    use super::models::*;
    use super::ids::UserId;

    #[test]
    fn test_new_post_starts_without_likes_or_tags() {
        let creator = UserId::generate();
        let post = Post::new(creator, "  Sixteen chars title  ", " body ");

        assert_eq!(post.creator, creator);
        assert_eq!(post.title, "Sixteen chars title");
        assert_eq!(post.content, "body");
        assert_eq!(post.likes.count(), 0);
        assert!(post.likes.is_empty());
        assert!(post.tags.is_empty());
        assert_eq!(post.version, 0);
    }
}

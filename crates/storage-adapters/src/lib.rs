//! forum/crates/storage-adapters/src/lib.rs
//!
//! Implementations of the `domains` repository ports.
//!
//! Only the in-memory backend exists today; it is what the seed binary and
//! the integration tests run against.

pub mod memory;

pub use memory::MemoryStore;

//! Storage seams for fingerprints and posts.
//!
//! Both stores are external collaborators. A handle is constructed once at
//! startup and passed explicitly to whatever needs it.

use async_trait::async_trait;

use crate::{
    error::Result,
    models::{Fingerprint, FingerprintRecord, NewPost, Post, PostId, PostUpdate},
};

mod memory;

pub use memory::{MemoryFingerprintStorage, MemoryPostStore};

/// Persistent set of `(post_id, fingerprint)` records.
///
/// Implementations provide their own consistency; callers take no locks.
#[async_trait]
pub trait FingerprintStorage: Send + Sync {
    /// Every stored record. Order is not significant.
    async fn load_all(&self) -> Result<Vec<FingerprintRecord>>;

    /// Insert or overwrite the fingerprint of `post_id`.
    async fn upsert(&self, post_id: PostId, fingerprint: Fingerprint) -> Result<()>;

    /// Remove the record of `post_id`. Returns whether one existed.
    async fn remove(&self, post_id: PostId) -> Result<bool>;
}

/// The external post store.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Create a post and return it with its assigned id.
    async fn create_post(&self, fields: NewPost) -> Result<Post>;

    /// Fetch a post by id.
    async fn get_post(&self, id: PostId) -> Result<Option<Post>>;

    /// Apply a content replacement to an existing post.
    ///
    /// Fails with `NotFound` when the post does not exist.
    async fn update_post(&self, id: PostId, fields: PostUpdate) -> Result<Post>;

    /// Delete a post. Returns whether it existed.
    async fn delete_post(&self, id: PostId) -> Result<bool>;
}

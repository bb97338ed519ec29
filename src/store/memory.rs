use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::BTreeMap,
    path::Path,
    sync::atomic::{AtomicI64, Ordering},
};
use tokio::sync::RwLock;

use crate::{
    error::{AppError, Result, ResultExt},
    models::{Fingerprint, FingerprintRecord, NewPost, Post, PostId, PostUpdate},
};

use super::{FingerprintStorage, PostStore};

/// In-process fingerprint catalog keyed by post id.
#[derive(Debug, Default)]
pub struct MemoryFingerprintStorage {
    records: RwLock<BTreeMap<PostId, Fingerprint>>,
}

impl MemoryFingerprintStorage {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = FingerprintRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|r| (r.post_id, r.fingerprint))
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }

    /// Loads a catalog from a JSON snapshot. A missing file yields an empty
    /// catalog.
    pub async fn load_snapshot(path: &Path) -> Result<Self> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No fingerprint snapshot at {}, starting empty", path.display());
                return Ok(Self::new());
            }
            result => {
                result.with_context(|| format!("reading catalog snapshot {}", path.display()))?
            }
        };
        let records: Vec<FingerprintRecord> = serde_json::from_slice(&data)?;
        log::info!(
            "Loaded {} fingerprint records from {}",
            records.len(),
            path.display()
        );
        Ok(Self::with_records(records))
    }

    /// Writes the catalog to `path` as JSON, replacing it atomically.
    pub async fn save_snapshot(&self, path: &Path) -> Result<()> {
        let records = self.load_all().await?;
        let json = serde_json::to_vec_pretty(&records)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing catalog snapshot {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("replacing catalog snapshot {}", path.display()))?;
        log::info!("Saved {} fingerprint records to {}", records.len(), path.display());
        Ok(())
    }

    /// Number of records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the catalog is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl FingerprintStorage for MemoryFingerprintStorage {
    async fn load_all(&self) -> Result<Vec<FingerprintRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .map(|(&post_id, fp)| FingerprintRecord::new(post_id, fp.clone()))
            .collect())
    }

    async fn upsert(&self, post_id: PostId, fingerprint: Fingerprint) -> Result<()> {
        self.records.write().await.insert(post_id, fingerprint);
        Ok(())
    }

    async fn remove(&self, post_id: PostId) -> Result<bool> {
        Ok(self.records.write().await.remove(&post_id).is_some())
    }
}

/// In-process post store with sequential ids.
#[derive(Debug)]
pub struct MemoryPostStore {
    posts: RwLock<BTreeMap<PostId, Post>>,
    next_id: AtomicI64,
}

impl Default for MemoryPostStore {
    fn default() -> Self {
        Self {
            posts: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl MemoryPostStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty store handing out ids from `next_id` on.
    pub fn starting_at(next_id: PostId) -> Self {
        Self {
            next_id: AtomicI64::new(next_id.max(1)),
            ..Self::default()
        }
    }

    /// An empty store whose ids continue after every post in `catalog`.
    ///
    /// Used after restoring a catalog snapshot so new posts never reuse the
    /// id of a recorded one.
    pub async fn resuming(catalog: &MemoryFingerprintStorage) -> Self {
        let next_id = catalog
            .records
            .read()
            .await
            .keys()
            .next_back()
            .map_or(1, |last| last + 1);
        log::debug!("Post ids resume at {}", next_id);
        Self::starting_at(next_id)
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn create_post(&self, fields: NewPost) -> Result<Post> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let post = Post {
            id,
            anonymous: fields.anonymous,
            safety: fields.safety,
            file_ext: fields.file_ext,
            fingerprint: fields.fingerprint,
            content_digest: fields.content_digest,
            created_at: now,
            updated_at: now,
        };
        self.posts.write().await.insert(id, post.clone());
        Ok(post)
    }

    async fn get_post(&self, id: PostId) -> Result<Option<Post>> {
        Ok(self.posts.read().await.get(&id).cloned())
    }

    async fn update_post(&self, id: PostId, fields: PostUpdate) -> Result<Post> {
        let mut posts = self.posts.write().await;
        let post = posts
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("post {}", id)))?;
        post.file_ext = fields.file_ext;
        post.fingerprint = fields.fingerprint;
        post.content_digest = fields.content_digest;
        post.updated_at = Utc::now();
        Ok(post.clone())
    }

    async fn delete_post(&self, id: PostId) -> Result<bool> {
        Ok(self.posts.write().await.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Safety;

    #[tokio::test]
    async fn test_fingerprint_upsert_and_remove() {
        let storage = MemoryFingerprintStorage::new();
        storage.upsert(3, Fingerprint::from_u64(1)).await.unwrap();
        storage.upsert(1, Fingerprint::from_u64(2)).await.unwrap();
        storage.upsert(3, Fingerprint::from_u64(9)).await.unwrap();

        let records = storage.load_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], FingerprintRecord::new(3, Fingerprint::from_u64(9)));

        assert!(storage.remove(3).await.unwrap());
        assert!(!storage.remove(3).await.unwrap());
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");

        let missing = MemoryFingerprintStorage::load_snapshot(&path).await.unwrap();
        assert!(missing.is_empty().await);

        let storage = MemoryFingerprintStorage::with_records(vec![
            FingerprintRecord::new(1, Fingerprint::from_u64(0xabc)),
            FingerprintRecord::new(2, Fingerprint::from_u64(0xdef)),
        ]);
        storage.save_snapshot(&path).await.unwrap();

        let loaded = MemoryFingerprintStorage::load_snapshot(&path).await.unwrap();
        assert_eq!(loaded.load_all().await.unwrap(), storage.load_all().await.unwrap());
        assert!(!dir.path().join("catalog.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_post_lifecycle() {
        let posts = MemoryPostStore::new();
        let first = posts
            .create_post(NewPost {
                anonymous: true,
                safety: Safety::Sketchy,
                file_ext: "png".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let second = posts.create_post(NewPost::default()).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        let updated = posts
            .update_post(
                1,
                PostUpdate {
                    file_ext: "jpg".into(),
                    fingerprint: Some(Fingerprint::from_u64(5)),
                    content_digest: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.file_ext, "jpg");
        assert!(updated.anonymous);

        assert!(posts.delete_post(1).await.unwrap());
        assert!(posts.get_post(1).await.unwrap().is_none());
        assert!(matches!(
            posts.update_post(1, PostUpdate {
                file_ext: "png".into(),
                fingerprint: None,
                content_digest: None,
            })
            .await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_restart_does_not_reuse_recorded_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let before = MemoryFingerprintStorage::with_records(vec![
            FingerprintRecord::new(1, Fingerprint::from_u64(0x11)),
            FingerprintRecord::new(4, Fingerprint::from_u64(0x44)),
        ]);
        before.save_snapshot(&path).await.unwrap();

        let catalog = MemoryFingerprintStorage::load_snapshot(&path).await.unwrap();
        let posts = MemoryPostStore::resuming(&catalog).await;
        let post = posts.create_post(NewPost::default()).await.unwrap();
        assert_eq!(post.id, 5);

        catalog.upsert(post.id, Fingerprint::from_u64(0x55)).await.unwrap();
        let records = catalog.load_all().await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], FingerprintRecord::new(1, Fingerprint::from_u64(0x11)));

        let fresh = MemoryPostStore::resuming(&MemoryFingerprintStorage::new()).await;
        assert_eq!(fresh.create_post(NewPost::default()).await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_snapshot_errors_name_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("catalog.json");
        let err = MemoryFingerprintStorage::new()
            .save_snapshot(&path)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing-dir"), "{}", err);
    }
}

//! The duplicate-check entry point used by the upload routes.

use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    core::{
        hash::{compute_content_digest, PerceptualHasher},
        matcher::{FingerprintStore, NearMatch},
        video::FrameExtractor,
    },
    error::{AppError, Result},
    models::{DuplicateVerdict, Fingerprint, MediaBuffer, MediaKind, NewPost, Post, PostId},
    state::{Config, ExtractorConfig},
    store::{FingerprintStorage, PostStore},
};

/// Reduces uploads to a still, fingerprints it and looks for near-duplicates.
///
/// Holds no per-call state; one instance serves all concurrent uploads.
pub struct Deduplicator {
    extractor: FrameExtractor,
    hasher: PerceptualHasher,
    fingerprints: FingerprintStore,
    posts: Arc<dyn PostStore>,
    threshold: u32,
}

impl std::fmt::Debug for Deduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator")
            .field("extractor", &self.extractor)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl Deduplicator {
    /// Creates a pipeline over the given collaborators.
    pub fn new(
        extractor: FrameExtractor,
        fingerprints: FingerprintStore,
        posts: Arc<dyn PostStore>,
        threshold: u32,
    ) -> Self {
        Self {
            extractor,
            hasher: PerceptualHasher::new(),
            fingerprints,
            posts,
            threshold,
        }
    }

    /// Creates a pipeline from application configuration.
    pub fn from_config(
        config: &Config,
        storage: Arc<dyn FingerprintStorage>,
        posts: Arc<dyn PostStore>,
    ) -> Self {
        Self::new(
            FrameExtractor::new(config.extractor.clone()),
            FingerprintStore::new(storage),
            posts,
            config.threshold,
        )
    }

    /// The duplicate threshold in bits.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Frame extraction settings in use.
    pub fn extractor_config(&self) -> &ExtractorConfig {
        self.extractor.config()
    }

    /// The fingerprint catalog.
    pub fn fingerprints(&self) -> &FingerprintStore {
        &self.fingerprints
    }

    /// Fingerprints an upload without consulting the catalog.
    ///
    /// Videos go through the frame extractor first; images and animated
    /// images are hashed directly (animated formats decode to their first
    /// frame).
    pub async fn compute_fingerprint(
        &self,
        media: &MediaBuffer,
        cancel: &CancellationToken,
    ) -> Result<Fingerprint> {
        let still = self.still_of(media, cancel).await?;
        let (fingerprint, _) = self.hash_still(still, None, cancel).await?;
        Ok(fingerprint)
    }

    async fn still_of(&self, media: &MediaBuffer, cancel: &CancellationToken) -> Result<Bytes> {
        match media.kind {
            MediaKind::Video => {
                self.extractor
                    .extract_frame(&media.bytes, &media.extension, cancel)
                    .await
            }
            MediaKind::Image | MediaKind::Animated => Ok(media.bytes.clone()),
            MediaKind::Other => Err(AppError::UnsupportedMedia(format!(
                "cannot fingerprint .{} files",
                media.extension
            ))),
        }
    }

    /// Checks an upload against the whole catalog.
    pub async fn check_duplicate(
        &self,
        media: &MediaBuffer,
        cancel: &CancellationToken,
    ) -> Result<DuplicateVerdict> {
        self.check(media, None, cancel).await
    }

    /// Checks replacement media for `post_id`, ignoring the post's own
    /// record.
    pub async fn check_replacement(
        &self,
        post_id: PostId,
        media: &MediaBuffer,
        cancel: &CancellationToken,
    ) -> Result<DuplicateVerdict> {
        self.check(media, Some(post_id), cancel).await
    }

    async fn check(
        &self,
        media: &MediaBuffer,
        exclude: Option<PostId>,
        cancel: &CancellationToken,
    ) -> Result<DuplicateVerdict> {
        log::debug!("Checking {:?} for duplicates", media);
        let still = self.still_of(media, cancel).await?;
        let (fingerprint, digest) = self
            .hash_still(still, Some(media.bytes.clone()), cancel)
            .await?;
        let content_digest = digest.unwrap_or_default();

        let found = self
            .fingerprints
            .scan(&fingerprint, self.threshold, exclude, cancel)
            .await?;

        let Some(NearMatch { record, distance }) = found else {
            log::info!("Upload {} is unique", fingerprint);
            return Ok(DuplicateVerdict::unique(fingerprint, content_digest));
        };

        log::info!(
            "Upload {} duplicates post {} (distance {})",
            fingerprint,
            record.post_id,
            distance
        );

        // A failed lookup must not hide the duplicate.
        let original_post = match self.posts.get_post(record.post_id).await {
            Ok(Some(post)) => Some(post),
            Ok(None) => {
                log::warn!(
                    "Post {} has a fingerprint record but no post row",
                    record.post_id
                );
                None
            }
            Err(e) => {
                log::warn!(
                    "Post lookup degraded for duplicate of post {}: {}",
                    record.post_id,
                    e
                );
                None
            }
        };

        Ok(DuplicateVerdict {
            is_duplicate: true,
            fingerprint,
            content_digest,
            matched_post_id: Some(record.post_id),
            distance: Some(distance),
            original_post,
        })
    }

    /// Records the fingerprint of an accepted or replaced post.
    pub async fn register(&self, post_id: PostId, fingerprint: Fingerprint) -> Result<()> {
        self.fingerprints.upsert(post_id, fingerprint).await
    }

    /// Forgets the fingerprint of a deleted post.
    pub async fn forget(&self, post_id: PostId) -> Result<bool> {
        self.fingerprints.remove(post_id).await
    }

    /// Creates a post for an accepted upload and records its fingerprint.
    ///
    /// The post is deleted again when the fingerprint cannot be recorded, so
    /// no post is left without a catalog entry.
    pub async fn accept(&self, fields: NewPost) -> Result<Post> {
        let fingerprint = fields.fingerprint.clone();
        let post = self.posts.create_post(fields).await?;
        let Some(fingerprint) = fingerprint else {
            return Ok(post);
        };

        if let Err(e) = self.register(post.id, fingerprint).await {
            log::error!("Recording fingerprint of post {} failed: {}", post.id, e);
            match self.posts.delete_post(post.id).await {
                Ok(_) => log::info!("Rolled back post {}", post.id),
                Err(rollback) => {
                    log::error!("Rolling back post {} failed: {}", post.id, rollback)
                }
            }
            return Err(e);
        }
        Ok(post)
    }

    async fn hash_still(
        &self,
        still: Bytes,
        raw: Option<Bytes>,
        cancel: &CancellationToken,
    ) -> Result<(Fingerprint, Option<String>)> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let hasher = self.hasher;
        let token = cancel.clone();
        let task =
            tokio::task::spawn_blocking(move || hash_blocking(hasher, &still, raw.as_deref(), &token));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::Cancelled),
            joined = task => joined?,
        }
    }
}

/// CPU-bound part of a check: content digest, decode, fingerprint.
///
/// Re-checks the token between stages.
fn hash_blocking(
    hasher: PerceptualHasher,
    still: &[u8],
    raw: Option<&[u8]>,
    cancel: &CancellationToken,
) -> Result<(Fingerprint, Option<String>)> {
    let digest = raw.map(compute_content_digest);
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }
    let image = PerceptualHasher::decode(still)?;
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }
    Ok((hasher.fingerprint_image(&image)?, digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{FingerprintRecord, PostUpdate},
        store::{MemoryFingerprintStorage, MemoryPostStore},
    };
    use async_trait::async_trait;
    use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
    use std::io::Cursor;

    struct FailingPosts;

    #[async_trait]
    impl PostStore for FailingPosts {
        async fn create_post(&self, _fields: NewPost) -> Result<Post> {
            Err(AppError::Storage("connection refused".into()))
        }

        async fn get_post(&self, _id: PostId) -> Result<Option<Post>> {
            Err(AppError::Storage("connection refused".into()))
        }

        async fn update_post(&self, _id: PostId, _fields: PostUpdate) -> Result<Post> {
            Err(AppError::Storage("connection refused".into()))
        }

        async fn delete_post(&self, _id: PostId) -> Result<bool> {
            Err(AppError::Storage("connection refused".into()))
        }
    }

    struct FailingCatalog;

    #[async_trait]
    impl FingerprintStorage for FailingCatalog {
        async fn load_all(&self) -> Result<Vec<FingerprintRecord>> {
            Ok(Vec::new())
        }

        async fn upsert(&self, _post_id: PostId, _fingerprint: Fingerprint) -> Result<()> {
            Err(AppError::Storage("catalog unavailable".into()))
        }

        async fn remove(&self, _post_id: PostId) -> Result<bool> {
            Err(AppError::Storage("catalog unavailable".into()))
        }
    }

    fn png() -> Vec<u8> {
        let img = RgbImage::from_fn(64, 64, |x, y| {
            let v = if (x / 16 + y / 16) % 2 == 0 { 30 } else { 220 };
            Rgb([v, (x * 4) as u8, (y * 4) as u8])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    fn dedup_with(
        records: Vec<FingerprintRecord>,
        posts: Arc<dyn PostStore>,
    ) -> Deduplicator {
        Deduplicator::from_config(
            &Config::default(),
            Arc::new(MemoryFingerprintStorage::with_records(records)),
            posts,
        )
    }

    #[tokio::test]
    async fn test_unique_upload_returns_fingerprint() {
        let dedup = dedup_with(Vec::new(), Arc::new(MemoryPostStore::new()));
        let media = MediaBuffer::new(png(), "png");
        let verdict = dedup
            .check_duplicate(&media, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!verdict.is_duplicate);
        assert_eq!(verdict.fingerprint.bits(), 64);
        assert_eq!(verdict.content_digest, compute_content_digest(&media.bytes));
    }

    #[tokio::test]
    async fn test_lookup_failure_keeps_duplicate_status() {
        let media = MediaBuffer::new(png(), "png");
        let probe = dedup_with(Vec::new(), Arc::new(MemoryPostStore::new()));
        let fp = probe
            .compute_fingerprint(&media, &CancellationToken::new())
            .await
            .unwrap();

        let dedup = dedup_with(vec![FingerprintRecord::new(42, fp.clone())], Arc::new(FailingPosts));
        let verdict = dedup
            .check_duplicate(&media, &CancellationToken::new())
            .await
            .unwrap();
        assert!(verdict.is_duplicate);
        assert_eq!(verdict.matched_post_id, Some(42));
        assert_eq!(verdict.distance, Some(0));
        assert!(verdict.original_post.is_none());
        assert_eq!(verdict.fingerprint, fp);
    }

    #[tokio::test]
    async fn test_other_media_is_rejected() {
        let dedup = dedup_with(Vec::new(), Arc::new(MemoryPostStore::new()));
        let media = MediaBuffer::new(b"hello".to_vec(), "txt");
        let err = dedup
            .check_duplicate(&media, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedMedia(_)));
    }

    #[tokio::test]
    async fn test_corrupt_image_fails_hashing() {
        let dedup = dedup_with(Vec::new(), Arc::new(MemoryPostStore::new()));
        let media = MediaBuffer::new(b"\x89PNG\r\n\x1a\ntruncated".to_vec(), "png");
        let err = dedup
            .check_duplicate(&media, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::HashComputation(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_hashing() {
        let dedup = dedup_with(Vec::new(), Arc::new(MemoryPostStore::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = dedup
            .check_duplicate(&MediaBuffer::new(png(), "png"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
    }

    #[tokio::test]
    async fn test_replacement_ignores_own_record() {
        let media = MediaBuffer::new(png(), "png");
        let probe = dedup_with(Vec::new(), Arc::new(MemoryPostStore::new()));
        let fp = probe
            .compute_fingerprint(&media, &CancellationToken::new())
            .await
            .unwrap();

        let dedup = dedup_with(vec![FingerprintRecord::new(7, fp)], Arc::new(MemoryPostStore::new()));
        let cancel = CancellationToken::new();
        assert!(!dedup.check_replacement(7, &media, &cancel).await.unwrap().is_duplicate);
        assert!(dedup.check_replacement(8, &media, &cancel).await.unwrap().is_duplicate);
    }

    #[tokio::test]
    async fn test_accept_records_fingerprint() {
        let catalog = Arc::new(MemoryFingerprintStorage::new());
        let posts = Arc::new(MemoryPostStore::new());
        let dedup = Deduplicator::from_config(&Config::default(), catalog.clone(), posts.clone());

        let post = dedup
            .accept(NewPost {
                fingerprint: Some(Fingerprint::from_u64(0xf0)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(
            catalog.load_all().await.unwrap(),
            vec![FingerprintRecord::new(post.id, Fingerprint::from_u64(0xf0))]
        );
    }

    #[tokio::test]
    async fn test_accept_rolls_back_post_when_catalog_fails() {
        let posts = Arc::new(MemoryPostStore::new());
        let dedup = Deduplicator::from_config(&Config::default(), Arc::new(FailingCatalog), posts.clone());

        let err = dedup
            .accept(NewPost {
                fingerprint: Some(Fingerprint::from_u64(1)),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert!(posts.get_post(1).await.unwrap().is_none());
    }

    #[test]
    fn test_blocking_hash_observes_cancellation() {
        let cancel = CancellationToken::new();
        let still = png();

        let (fp, digest) =
            hash_blocking(PerceptualHasher::new(), &still, Some(b"raw".as_slice()), &cancel).unwrap();
        assert_eq!(fp.bits(), 64);
        assert_eq!(digest, Some(compute_content_digest(b"raw")));

        cancel.cancel();
        let err = hash_blocking(PerceptualHasher::new(), &still, None, &cancel).unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
    }
}

//! Linear-scan near-duplicate matching over the fingerprint catalog.
//!
//! Every lookup walks the whole catalog in ascending post id order and stops
//! at the first record within the distance bound. It is not a nearest
//! neighbour search: a closer record with a higher id is never reported.
//! Cost grows linearly with the catalog; bucketing by hash prefix would be
//! the next step if that becomes a problem.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{AppError, Result},
    models::{Fingerprint, FingerprintRecord, PostId},
    store::FingerprintStorage,
};

/// How often the scan checks for cancellation.
const CANCEL_CHECK_INTERVAL: usize = 4096;

/// A catalog record within the distance bound of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NearMatch {
    /// The matching record.
    pub record: FingerprintRecord,
    /// Hamming distance between the query and the record.
    pub distance: u32,
}

/// Matcher and lifecycle maintenance over a [`FingerprintStorage`] handle.
#[derive(Clone)]
pub struct FingerprintStore {
    storage: Arc<dyn FingerprintStorage>,
}

impl std::fmt::Debug for FingerprintStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintStore").finish_non_exhaustive()
    }
}

impl FingerprintStore {
    /// Wraps a storage handle.
    pub fn new(storage: Arc<dyn FingerprintStorage>) -> Self {
        Self { storage }
    }

    /// First record, by ascending post id, within `max_distance` of
    /// `fingerprint`.
    pub async fn find_near(
        &self,
        fingerprint: &Fingerprint,
        max_distance: u32,
    ) -> Result<Option<NearMatch>> {
        self.scan(fingerprint, max_distance, None, &CancellationToken::new())
            .await
    }

    /// Like [`find_near`](Self::find_near) but ignores `exclude`, so a post
    /// whose media is being replaced never matches itself.
    pub async fn find_near_excluding(
        &self,
        fingerprint: &Fingerprint,
        max_distance: u32,
        exclude: PostId,
    ) -> Result<Option<NearMatch>> {
        self.scan(fingerprint, max_distance, Some(exclude), &CancellationToken::new())
            .await
    }

    pub(crate) async fn scan(
        &self,
        fingerprint: &Fingerprint,
        max_distance: u32,
        exclude: Option<PostId>,
        cancel: &CancellationToken,
    ) -> Result<Option<NearMatch>> {
        let mut records = self.storage.load_all().await?;
        records.sort_unstable_by_key(|r| r.post_id);
        log::debug!(
            "Scanning {} fingerprints for {} (max distance {})",
            records.len(),
            fingerprint,
            max_distance
        );

        for (i, record) in records.into_iter().enumerate() {
            if i % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            if Some(record.post_id) == exclude {
                continue;
            }
            let distance = match fingerprint.distance(&record.fingerprint) {
                Ok(distance) => distance,
                Err(e) => {
                    log::error!(
                        "Fingerprint integrity violation against post {}: {}",
                        record.post_id,
                        e
                    );
                    return Err(e);
                }
            };
            if distance <= max_distance {
                return Ok(Some(NearMatch { record, distance }));
            }
        }

        Ok(None)
    }

    /// Stores or overwrites the fingerprint of `post_id`.
    pub async fn upsert(&self, post_id: PostId, fingerprint: Fingerprint) -> Result<()> {
        log::debug!("Storing fingerprint {} for post {}", fingerprint, post_id);
        self.storage.upsert(post_id, fingerprint).await
    }

    /// Drops the fingerprint of `post_id`. Returns whether one existed.
    pub async fn remove(&self, post_id: PostId) -> Result<bool> {
        log::debug!("Removing fingerprint of post {}", post_id);
        self.storage.remove(post_id).await
    }
}

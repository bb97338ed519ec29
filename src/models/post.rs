//! Minimal view of the external post entity, plus the verdict of a
//! duplicate check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::AppError;

use super::fingerprint::Fingerprint;

/// Identifier of a post in the external store.
pub type PostId = i64;

/// Content rating attached to a post.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Safety {
    /// Safe for work.
    #[default]
    Safe,
    /// Questionable.
    Sketchy,
    /// Not safe for work.
    Unsafe,
}

impl FromStr for Safety {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(Self::Safe),
            "sketchy" => Ok(Self::Sketchy),
            "unsafe" => Ok(Self::Unsafe),
            other => Err(AppError::InvalidInput(format!("unknown safety rating: {}", other))),
        }
    }
}

/// A post as returned by the external post store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Post {
    /// Post id.
    pub id: PostId,
    /// Whether the uploader chose to stay anonymous.
    pub anonymous: bool,
    /// Content rating.
    pub safety: Safety,
    /// Extension of the stored media.
    pub file_ext: String,
    /// Perceptual fingerprint of the current media, if any.
    pub fingerprint: Option<Fingerprint>,
    /// SHA3-256 of the current media bytes.
    pub content_digest: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last content change.
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a post.
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    /// Whether the uploader chose to stay anonymous.
    pub anonymous: bool,
    /// Content rating.
    pub safety: Safety,
    /// Extension of the uploaded media.
    pub file_ext: String,
    /// Fingerprint computed during the duplicate check.
    pub fingerprint: Option<Fingerprint>,
    /// SHA3-256 of the uploaded bytes.
    pub content_digest: Option<String>,
}

/// Fields changed when a post's media is replaced.
#[derive(Debug, Clone)]
pub struct PostUpdate {
    /// Extension of the replacement media.
    pub file_ext: String,
    /// Fingerprint of the replacement media.
    pub fingerprint: Option<Fingerprint>,
    /// SHA3-256 of the replacement bytes.
    pub content_digest: Option<String>,
}

/// Outcome of one duplicate check. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateVerdict {
    /// Whether an existing post is within the duplicate threshold.
    pub is_duplicate: bool,
    /// Fingerprint of the checked media, returned in every case.
    pub fingerprint: Fingerprint,
    /// SHA3-256 of the raw upload.
    pub content_digest: String,
    /// Id of the first matching post.
    pub matched_post_id: Option<PostId>,
    /// Hamming distance to the matching post.
    pub distance: Option<u32>,
    /// The matching post, when the lookup succeeded.
    pub original_post: Option<Post>,
}

impl DuplicateVerdict {
    /// A verdict with no match.
    pub fn unique(fingerprint: Fingerprint, content_digest: String) -> Self {
        Self {
            is_duplicate: false,
            fingerprint,
            content_digest,
            matched_post_id: None,
            distance: None,
            original_post: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_parsing() {
        assert_eq!("safe".parse::<Safety>().unwrap(), Safety::Safe);
        assert_eq!(" Sketchy ".parse::<Safety>().unwrap(), Safety::Sketchy);
        assert_eq!("UNSAFE".parse::<Safety>().unwrap(), Safety::Unsafe);
        assert!("explicit".parse::<Safety>().is_err());
        assert_eq!(Safety::default(), Safety::Safe);
    }

    #[test]
    fn test_unique_verdict() {
        let verdict = DuplicateVerdict::unique(Fingerprint::from_u64(1), "abc".into());
        assert!(!verdict.is_duplicate);
        assert!(verdict.matched_post_id.is_none());
        assert!(verdict.original_post.is_none());
    }
}

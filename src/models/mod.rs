//! Data types shared by the duplicate-check pipeline

pub mod fingerprint;
pub mod media;
pub mod post;

pub use fingerprint::{Fingerprint, FingerprintRecord, DEFAULT_THRESHOLD};
pub use media::{MediaBuffer, MediaKind};
pub use post::{DuplicateVerdict, NewPost, Post, PostId, PostUpdate, Safety};

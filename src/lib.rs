#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

//! # booru-dedup
//!
//! Upload duplicate detection for an imageboard. Every upload is reduced to
//! a single still frame, fingerprinted with a 64-bit perceptual hash and
//! compared against the fingerprints of all existing posts.
//!
//! ## Pipeline
//!
//! - **Frame extraction**: videos go through `ffmpeg`, which picks a
//!   representative frame and scales it to a fixed width
//! - **Perceptual hashing**: DCT hash of the still, tolerant to resizing
//!   and recompression
//! - **Matching**: first catalog entry, by ascending post id, within the
//!   Hamming-distance threshold (5 of 64 bits by default)
//! - **Verdict**: duplicate flag, the new fingerprint, and the original
//!   post when it can be resolved
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use booru_dedup::{Config, Deduplicator, MediaBuffer, MemoryFingerprintStorage, MemoryPostStore};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> booru_dedup::Result<()> {
//! let dedup = Deduplicator::from_config(
//!     &Config::default(),
//!     Arc::new(MemoryFingerprintStorage::new()),
//!     Arc::new(MemoryPostStore::new()),
//! );
//! let media = MediaBuffer::new(std::fs::read("upload.png")?, "png");
//! let verdict = dedup.check_duplicate(&media, &CancellationToken::new()).await?;
//! println!("duplicate: {} ({})", verdict.is_duplicate, verdict.fingerprint);
//! # Ok(())
//! # }
//! ```

// Internal modules
pub mod api;
pub mod core;
pub mod error;
pub mod models;
mod state;
/// Storage seams for fingerprints and posts.
pub mod store;
mod utils;

// Public API exports
pub use crate::{
    core::{
        dedup::Deduplicator,
        hash::{compute_content_digest, PerceptualHasher},
        matcher::{FingerprintStore, NearMatch},
        video::{check_decoder_installed, FrameExtractor},
    },
    error::{AppError, Result, ResultExt},
    models::{
        DuplicateVerdict, Fingerprint, FingerprintRecord, MediaBuffer, MediaKind, NewPost, Post,
        PostId, PostUpdate, Safety, DEFAULT_THRESHOLD,
    },
    state::{AppState, Config, DecoderCommand, ExtractorConfig},
    store::{FingerprintStorage, MemoryFingerprintStorage, MemoryPostStore, PostStore},
};

#[cfg(feature = "web")]
pub use crate::api::{create_router, health_check};

/// Initialize the application with default settings
///
/// This function sets up logging and checks that the video decoder can be
/// launched. It should be called early in the application startup process.
///
/// # Errors
///
/// Returns an error if logging initialization fails.
pub fn init(config: &Config) -> Result<()> {
    // Initialize logging with sensible defaults
    let env = env_logger::Env::default()
        .default_filter_or("info")
        .default_write_style_or("auto");

    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .format_module_path(false)
        .format_target(false)
        .try_init()
        .map_err(|e| AppError::Config(format!("logger already initialised: {}", e)))?;

    log::info!("Initializing booru-dedup");

    // Check for required system dependencies
    if let Err(e) = check_decoder_installed(&config.extractor.decoder) {
        log::warn!("{}", e);
        log::warn!("Video uploads will fail until the decoder is available");
    }

    log::info!(
        "Duplicate threshold {} bits, frame width {}px, {} concurrent extractions",
        config.threshold,
        config.extractor.frame_width,
        config.extractor.max_concurrent
    );
    Ok(())
}

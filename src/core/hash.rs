//! Perceptual and cryptographic hashing of uploads.
//!
//! The perceptual fingerprint is a 64-bit DCT hash:
//!
//! 1. decode the still (first frame for animated formats),
//! 2. convert to grayscale and shrink to 32×32,
//! 3. run a 2-D DCT-II and keep the top-left 8×8 low-frequency block,
//! 4. set bit *i* when coefficient *i* is above the median of the 63 AC
//!    coefficients.
//!
//! Flat images have no AC energy to rank, so they get a colour fingerprint
//! instead: a fixed marker followed by a 16-level thermometer code of the
//! mean red, green and blue values.
//!
//! Re-encoding and resizing barely move the low frequencies, so such copies
//! land within a few bits of the original. Unrelated images differ in
//! roughly half of the bits.

use image::{imageops::FilterType, DynamicImage, GenericImageView};
use rustdct::{Dct2, DctPlanner};
use sha3::{Digest, Sha3_256};

use crate::{
    error::{AppError, Result},
    models::Fingerprint,
};

/// Side of the grayscale image fed to the DCT.
const SAMPLE_SIDE: usize = 32;
/// Side of the retained low-frequency block; the hash has `HASH_SIDE²` bits.
const HASH_SIDE: usize = 8;
/// Per-sample AC magnitude under which an image counts as flat.
const FLAT_AC_LIMIT: f32 = 1.0;
/// Top 16 bits of every flat-image fingerprint.
const FLAT_MARKER: u64 = 0x8000;
/// Thermometer levels per colour channel in a flat-image fingerprint.
const CHANNEL_LEVELS: u64 = 16;

/// Computes 64-bit perceptual fingerprints from still images.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerceptualHasher;

impl PerceptualHasher {
    /// Creates a hasher.
    pub fn new() -> Self {
        Self
    }

    /// Decodes `still` and fingerprints it.
    ///
    /// Fails with [`AppError::HashComputation`] when the bytes are not a
    /// decodable image.
    pub fn compute_fingerprint(&self, still: &[u8]) -> Result<Fingerprint> {
        let image = Self::decode(still)?;
        self.fingerprint_image(&image)
    }

    pub(crate) fn decode(still: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory(still)
            .map_err(|e| AppError::HashComputation(format!("undecodable image: {}", e)))
    }

    /// Fingerprints an already decoded image.
    pub fn fingerprint_image(&self, image: &DynamicImage) -> Result<Fingerprint> {
        if image.width() == 0 || image.height() == 0 {
            return Err(AppError::HashComputation("image has no pixels".to_string()));
        }

        let gray = image.to_luma8();
        let small = image::imageops::resize(
            &gray,
            SAMPLE_SIDE as u32,
            SAMPLE_SIDE as u32,
            FilterType::Triangle,
        );
        let mut samples: Vec<f32> = small.pixels().map(|p| p.0[0] as f32).collect();

        let block = low_frequency_block(&mut samples);
        if is_flat(&block) {
            return Ok(Fingerprint::from_u64(flat_colour_bits(image)));
        }
        Ok(Fingerprint::from_u64(bits_above_median(&block)))
    }
}

/// Runs the 2-D DCT over a `SAMPLE_SIDE²` row-major buffer and returns the
/// top-left `HASH_SIDE²` coefficients, row-major.
fn low_frequency_block(samples: &mut [f32]) -> [f32; HASH_SIDE * HASH_SIDE] {
    let mut planner = DctPlanner::<f32>::new();
    let dct = planner.plan_dct2(SAMPLE_SIDE);

    for row in samples.chunks_exact_mut(SAMPLE_SIDE) {
        dct.process_dct2(row);
    }

    // Only the first HASH_SIDE columns are needed after the row pass.
    let mut block = [0f32; HASH_SIDE * HASH_SIDE];
    let mut column = vec![0f32; SAMPLE_SIDE];
    for x in 0..HASH_SIDE {
        for (y, value) in column.iter_mut().enumerate() {
            *value = samples[y * SAMPLE_SIDE + x];
        }
        dct.process_dct2(&mut column);
        for y in 0..HASH_SIDE {
            block[y * HASH_SIDE + x] = column[y];
        }
    }
    block
}

fn bits_above_median(block: &[f32; HASH_SIDE * HASH_SIDE]) -> u64 {
    // DC only carries overall brightness, keep it out of the median
    let mut ac: Vec<f32> = block[1..].to_vec();
    ac.sort_by(|a, b| a.total_cmp(b));
    let median = ac[ac.len() / 2];

    block.iter().fold(0u64, |hash, &coefficient| {
        (hash << 1) | u64::from(coefficient > median)
    })
}

fn is_flat(block: &[f32; HASH_SIDE * HASH_SIDE]) -> bool {
    let samples = (SAMPLE_SIDE * SAMPLE_SIDE) as f32;
    block[1..].iter().all(|c| c.abs() / samples < FLAT_AC_LIMIT)
}

/// Marker, then one thermometer-coded 16-bit word per RGB channel mean.
fn flat_colour_bits(image: &DynamicImage) -> u64 {
    let small = image::imageops::resize(
        &image.to_rgb8(),
        SAMPLE_SIDE as u32,
        SAMPLE_SIDE as u32,
        FilterType::Triangle,
    );
    let mut sums = [0u64; 3];
    for pixel in small.pixels() {
        for (sum, &channel) in sums.iter_mut().zip(pixel.0.iter()) {
            *sum += u64::from(channel);
        }
    }

    let count = (SAMPLE_SIDE * SAMPLE_SIDE) as u64;
    sums.iter().fold(FLAT_MARKER, |hash, &sum| {
        let level = (sum / count) * (CHANNEL_LEVELS + 1) / 256;
        (hash << CHANNEL_LEVELS) | ((1u64 << level) - 1)
    })
}

/// Computes the SHA3-256 digest of raw upload bytes as lower-case hex.
pub fn compute_content_digest(data: &[u8]) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

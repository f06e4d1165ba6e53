//! Decides whether the screen changed between two checks.
//!
//! Frames are normalised to a small square and reduced to a 64 bit DCT perceptual hash, so minor
//! rendering noise (cursor blink, clock ticking) doesn't register as activity. The comparator keeps
//! the previous fingerprint; the caller owns the comparator and only touches it inside the check
//! critical section.

use std::fmt::Display;

use anyhow::Result;
use image::imageops::FilterType;
use image_hasher::{HashAlg, HasherConfig, ImageHash};

use crate::capture::Frame;

/// Side of the square every frame is resized to before hashing.
pub const NORMALIZED_SIZE: u32 = 256;

/// Maximum meaningful hamming distance for an 8x8 hash.
pub const MAX_DIFF: u32 = 64;

pub const DEFAULT_INACTIVITY_THRESHOLD: f64 = 0.95;

/// Perceptual hash of one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint(ImageHash);

impl Fingerprint {
    pub fn of(frame: &Frame) -> Result<Self> {
        let image = frame
            .decode()?
            .resize_exact(NORMALIZED_SIZE, NORMALIZED_SIZE, FilterType::Triangle);

        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Mean)
            .hash_size(8, 8)
            .preproc_dct()
            .to_hasher();

        Ok(Self(hasher.hash_image(&image)))
    }

    pub fn distance(&self, other: &Fingerprint) -> u32 {
        self.0.dist(&other.0)
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_base64())
    }
}

/// Maps a hash distance onto `[0, 1]`, 1 meaning identical. Distances past [MAX_DIFF] are capped.
pub fn similarity_from_distance(distance: u32) -> f64 {
    1.0 - f64::from(distance.min(MAX_DIFF)) / f64::from(MAX_DIFF)
}

/// Fingerprints `frame` and scores it against `previous`. Without a previous fingerprint there is no
/// baseline and the similarity is 0.
pub fn compare(previous: Option<&Fingerprint>, frame: &Frame) -> Result<(Fingerprint, f64)> {
    let current = Fingerprint::of(frame)?;
    let similarity = previous
        .map(|previous| similarity_from_distance(previous.distance(&current)))
        .unwrap_or(0.0);
    Ok((current, similarity))
}

/// Result of comparing the latest frame to the previous one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub similarity: f64,
    pub is_idle: bool,
}

pub struct SimilarityComparator {
    previous: Option<Fingerprint>,
    threshold: f64,
}

impl SimilarityComparator {
    pub fn new(threshold: f64) -> Self {
        Self {
            previous: None,
            threshold,
        }
    }

    pub fn previous(&self) -> Option<&Fingerprint> {
        self.previous.as_ref()
    }

    /// A frame is idle when it's more similar than the threshold. Bit-identical frames count as
    /// idle even with a threshold of 1.0.
    pub fn is_idle(&self, similarity: f64) -> bool {
        similarity > self.threshold || similarity >= 1.0
    }

    /// Retains `fingerprint` as the next baseline and applies the idle policy. The first frame
    /// never counts as idle.
    pub fn accept(&mut self, fingerprint: Fingerprint, similarity: f64) -> Comparison {
        let had_baseline = self.previous.replace(fingerprint).is_some();
        Comparison {
            similarity,
            is_idle: had_baseline && self.is_idle(similarity),
        }
    }

    /// Compares and retains in one step, on the calling thread.
    #[cfg(test)]
    pub fn observe(&mut self, frame: &Frame) -> Result<Comparison> {
        let (fingerprint, similarity) = compare(self.previous.as_ref(), frame)?;
        Ok(self.accept(fingerprint, similarity))
    }
}

impl Default for SimilarityComparator {
    fn default() -> Self {
        Self::new(DEFAULT_INACTIVITY_THRESHOLD)
    }
}

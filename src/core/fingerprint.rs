use crate::core::asset::{Asset, MediaKind};
use image::ImageReader;
use image_hasher::{HashAlg, Hasher, HasherConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decoding error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Unsupported media kind for fingerprinting: {kind}")]
    UnsupportedMedia { kind: MediaKind },

    #[error("Asset {id} unavailable: {reason}")]
    Unavailable { id: String, reason: String },
}

/// Fixed-dimension perceptual descriptor. Smaller distance means more similar.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Euclidean distance. Vectors of different dimension are infinitely far
    /// apart, so they can never satisfy a similarity threshold.
    pub fn distance(&self, other: &FeatureVector) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }

        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

/// Turns an asset into a [`FeatureVector`].
///
/// Implementations may block (remote assets, slow decoders); callers are
/// expected to run them off the async executor.
pub trait FingerprintExtractor: Send + Sync {
    fn extract(&self, asset: &Asset) -> Result<FeatureVector, ExtractionError>;
}

impl<E: FingerprintExtractor + ?Sized> FingerprintExtractor for std::sync::Arc<E> {
    fn extract(&self, asset: &Asset) -> Result<FeatureVector, ExtractionError> {
        (**self).extract(asset)
    }
}

/// Gradient-hash extractor for still images read from `asset.path`.
///
/// Each hash bit becomes one vector component scaled by `1/sqrt(bits)`, so the
/// Euclidean distance of two vectors is `sqrt(hamming / bits)`. A threshold of
/// 0.5 therefore accepts pairs differing in fewer than a quarter of their bits.
pub struct ImageHashExtractor {
    hasher: Hasher,
}

impl ImageHashExtractor {
    pub const DEFAULT_HASH_SIZE: u32 = 16;

    pub fn new() -> Self {
        Self::with_hash_size(Self::DEFAULT_HASH_SIZE)
    }

    pub fn with_hash_size(hash_size: u32) -> Self {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Gradient)
            .hash_size(hash_size, hash_size)
            .to_hasher();

        Self { hasher }
    }
}

impl Default for ImageHashExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintExtractor for ImageHashExtractor {
    fn extract(&self, asset: &Asset) -> Result<FeatureVector, ExtractionError> {
        if asset.media_kind != MediaKind::Image {
            return Err(ExtractionError::UnsupportedMedia {
                kind: asset.media_kind,
            });
        }

        let img = ImageReader::open(asset.path())?
            .with_guessed_format()?
            .decode()?;

        let hash = self.hasher.hash_image(&img);
        Ok(bits_to_vector(hash.as_bytes()))
    }
}

fn bits_to_vector(bytes: &[u8]) -> FeatureVector {
    let bits = bytes.len() * 8;
    if bits == 0 {
        return FeatureVector::new(Vec::new());
    }

    let scale = 1.0 / (bits as f32).sqrt();
    let values = bytes
        .iter()
        .flat_map(|byte| (0..8).rev().map(move |shift| (byte >> shift) & 1))
        .map(|bit| bit as f32 * scale)
        .collect();

    FeatureVector::new(values)
}

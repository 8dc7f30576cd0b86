use crate::core::fingerprint::ImageHashExtractor;
use crate::core::similarity::DEFAULT_SIMILARITY_THRESHOLD;
use crate::core::sort::SortOrder;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub similarity_threshold: f32,
    pub extraction_workers: usize,
    pub hash_size: u32,
    pub default_sort: SortOrder,
    pub image_formats: Vec<String>,
    pub video_formats: Vec<String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            extraction_workers: num_cpus::get(),
            hash_size: ImageHashExtractor::DEFAULT_HASH_SIZE,
            default_sort: SortOrder::Date,
            image_formats: vec![
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
                "gif".to_string(),
                "bmp".to_string(),
                "tiff".to_string(),
                "tif".to_string(),
                "webp".to_string(),
            ],
            video_formats: vec![
                "mov".to_string(),
                "mp4".to_string(),
                "m4v".to_string(),
                "avi".to_string(),
                "mkv".to_string(),
            ],
        }
    }
}

impl LibraryConfig {
    /// Reads a JSON config file. Missing fields take their default values.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: LibraryConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.similarity_threshold.is_finite() || self.similarity_threshold <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "similarity_threshold".to_string(),
                reason: format!("must be a positive number, got {}", self.similarity_threshold),
            });
        }

        if self.extraction_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "extraction_workers".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if self.hash_size < 2 {
            return Err(ConfigError::Invalid {
                field: "hash_size".to_string(),
                reason: format!("must be at least 2, got {}", self.hash_size),
            });
        }

        Ok(())
    }
}

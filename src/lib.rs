//! Similarity grouping, background size caching and sorting for photo and
//! video libraries.

pub mod config;
pub mod core;

pub use crate::config::{ConfigError, LibraryConfig};
pub use crate::core::asset::{format_byte_count, Asset, MediaKind};
pub use crate::core::fingerprint::{
    ExtractionError, FeatureVector, FingerprintExtractor, ImageHashExtractor,
};
pub use crate::core::library::{CommandOutcome, Library, LibraryCommand, LibraryError};
pub use crate::core::similarity::{
    GroupingReport, SimilarityGroup, SimilarityGrouper, DEFAULT_SIMILARITY_THRESHOLD,
};
pub use crate::core::size_cache::{CachingState, SizeCache, SizeScanProgress};
pub use crate::core::sort::SortOrder;
pub use crate::core::store::{AssetStore, DirectoryStore, StoreError};

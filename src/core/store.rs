use crate::core::asset::{Asset, MediaKind};
use crate::core::sort;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Asset not found: {id}")]
    NotFound { id: String },

    #[error("Authorization denied: {reason}")]
    AuthorizationDenied { reason: String },
}

/// Source of the media collection.
pub trait AssetStore: Send + Sync {
    /// Every asset in the store, newest first.
    fn list_assets(&self) -> Result<Vec<Asset>, StoreError>;

    /// On-disk size of the asset's primary resource in bytes.
    fn resource_size(&self, asset: &Asset) -> Result<u64, StoreError>;

    /// Permanently removes the asset. Fails with [`StoreError::NotFound`] if
    /// it is already gone.
    fn delete(&self, asset: &Asset) -> Result<(), StoreError>;
}

impl<S: AssetStore + ?Sized> AssetStore for std::sync::Arc<S> {
    fn list_assets(&self) -> Result<Vec<Asset>, StoreError> {
        (**self).list_assets()
    }

    fn resource_size(&self, asset: &Asset) -> Result<u64, StoreError> {
        (**self).resource_size(asset)
    }

    fn delete(&self, asset: &Asset) -> Result<(), StoreError> {
        (**self).delete(asset)
    }
}

/// Store backed by a directory tree. Asset ids are paths relative to the root.
pub struct DirectoryStore {
    root: PathBuf,
    image_formats: HashSet<String>,
    video_formats: HashSet<String>,
}

impl DirectoryStore {
    pub fn new(
        root: impl Into<PathBuf>,
        image_formats: &[String],
        video_formats: &[String],
    ) -> Self {
        Self {
            root: root.into(),
            image_formats: image_formats.iter().map(|ext| ext.to_lowercase()).collect(),
            video_formats: video_formats.iter().map(|ext| ext.to_lowercase()).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn media_kind(&self, path: &Path) -> Option<MediaKind> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        if self.image_formats.contains(&ext) {
            Some(MediaKind::Image)
        } else if self.video_formats.contains(&ext) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    fn asset_id(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

/// Creation time of a file, falling back to its modification time.
fn file_timestamp(metadata: &fs::Metadata) -> Option<DateTime<Utc>> {
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

impl AssetStore for DirectoryStore {
    fn list_assets(&self) -> Result<Vec<Asset>, StoreError> {
        if !self.root.is_dir() {
            return Err(StoreError::AuthorizationDenied {
                reason: format!("{} is not a readable directory", self.root.display()),
            });
        }

        let mut assets = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry under {}: {}", self.root.display(), e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Some(media_kind) = self.media_kind(path) else {
                continue;
            };

            let created_at = match entry.metadata() {
                Ok(metadata) => file_timestamp(&metadata),
                Err(e) => {
                    log::debug!("No metadata for {}: {}", path.display(), e);
                    None
                }
            };

            assets.push(Asset {
                id: self.asset_id(path),
                path: path.to_path_buf(),
                created_at,
                media_kind,
                duration_seconds: None,
            });
        }

        sort::sort_by_date(&mut assets);
        log::info!("Found {} assets under {}", assets.len(), self.root.display());
        Ok(assets)
    }

    fn resource_size(&self, asset: &Asset) -> Result<u64, StoreError> {
        match fs::metadata(asset.path()) {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                id: asset.id.clone(),
            }),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn delete(&self, asset: &Asset) -> Result<(), StoreError> {
        match fs::remove_file(asset.path()) {
            Ok(()) => {
                log::info!("Deleted {}", asset.path().display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                id: asset.id.clone(),
            }),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

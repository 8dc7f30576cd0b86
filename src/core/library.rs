use crate::core::asset::Asset;
use crate::core::fingerprint::FingerprintExtractor;
use crate::core::similarity::{GroupingReport, SimilarityGrouper};
use crate::core::size_cache::SizeCache;
use crate::core::sort::{self, SortOrder};
use crate::core::store::{AssetStore, StoreError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Asset store error: {0}")]
    Store(#[from] StoreError),

    #[error("Unknown asset: {id}")]
    UnknownAsset { id: String },

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Actions a front end can trigger on the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryCommand {
    SortByDate,
    SortBySize,
    SortByVideos,
    FindSimilar,
}

#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Sorted(SortOrder),
    Similar(GroupingReport),
}

/// Owns the current asset collection and routes it to the size cache, the
/// sort engine and the similarity grouper.
pub struct Library<S, E> {
    store: Arc<S>,
    assets: Vec<Asset>,
    size_cache: SizeCache,
    grouper: Arc<SimilarityGrouper<E>>,
}

impl<S, E> Library<S, E>
where
    S: AssetStore + 'static,
    E: FingerprintExtractor + 'static,
{
    pub fn new(store: S, grouper: SimilarityGrouper<E>) -> Self {
        Self {
            store: Arc::new(store),
            assets: Vec::new(),
            size_cache: SizeCache::new(),
            grouper: Arc::new(grouper),
        }
    }

    /// Replaces the collection with the store's current contents and starts a
    /// fresh size scan over it. If the store cannot be listed the collection is
    /// left empty.
    pub async fn load(&mut self) -> Result<usize, LibraryError> {
        let store = self.store.clone();
        let listed = tokio::task::spawn_blocking(move || store.list_assets()).await;

        let assets = match listed {
            Ok(Ok(assets)) => assets,
            Ok(Err(e)) => {
                log::error!("Could not list assets: {}", e);
                self.replace_assets(Vec::new());
                return Err(e.into());
            }
            Err(e) => {
                self.replace_assets(Vec::new());
                return Err(e.into());
            }
        };

        let count = assets.len();
        self.replace_assets(assets);
        Ok(count)
    }

    fn replace_assets(&mut self, assets: Vec<Asset>) {
        self.assets = assets;
        let store: Arc<dyn AssetStore> = self.store.clone();
        self.size_cache.start_scan(self.assets.clone(), store);
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn get(&self, id: &str) -> Option<&Asset> {
        self.assets.iter().find(|asset| asset.id == id)
    }

    pub fn size_cache(&self) -> &SizeCache {
        &self.size_cache
    }

    pub fn is_size_caching_complete(&self) -> bool {
        self.size_cache.is_complete()
    }

    pub fn sort(&mut self, order: SortOrder) {
        match order {
            SortOrder::Date => self.sort_by_date(),
            SortOrder::Size => self.sort_by_size(),
            SortOrder::Kind => self.sort_by_media_kind(),
        }
    }

    pub fn sort_by_date(&mut self) {
        sort::sort_by_date(&mut self.assets);
    }

    /// Orders by the sizes cached so far; assets not cached yet count as 0.
    pub fn sort_by_size(&mut self) {
        let sizes = self.size_cache.snapshot();
        if !self.size_cache.is_complete() {
            log::debug!(
                "Sorting by size with {} of {} sizes cached",
                sizes.len(),
                self.assets.len()
            );
        }
        sort::sort_by_size(&mut self.assets, |id| sizes.get(id).copied());
    }

    pub fn sort_by_media_kind(&mut self) {
        sort::sort_by_media_kind_then_date(&mut self.assets);
    }

    /// Groups a snapshot of the current collection by visual similarity.
    pub async fn find_similar(&self) -> GroupingReport {
        self.grouper.clone().group_async(self.assets.clone()).await
    }

    /// Deletes an asset from the store, then drops it from the collection and
    /// the size cache.
    pub fn delete(&mut self, id: &str) -> Result<Asset, LibraryError> {
        let index = self
            .assets
            .iter()
            .position(|asset| asset.id == id)
            .ok_or_else(|| LibraryError::UnknownAsset { id: id.to_string() })?;

        self.store.delete(&self.assets[index])?;

        let removed = self.assets.remove(index);
        self.size_cache.forget(&removed.id);
        Ok(removed)
    }

    pub async fn dispatch(&mut self, command: LibraryCommand) -> CommandOutcome {
        match command {
            LibraryCommand::SortByDate => {
                self.sort_by_date();
                CommandOutcome::Sorted(SortOrder::Date)
            }
            LibraryCommand::SortBySize => {
                self.sort_by_size();
                CommandOutcome::Sorted(SortOrder::Size)
            }
            LibraryCommand::SortByVideos => {
                self.sort_by_media_kind();
                CommandOutcome::Sorted(SortOrder::Kind)
            }
            LibraryCommand::FindSimilar => CommandOutcome::Similar(self.find_similar().await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fingerprint::{ExtractionError, FeatureVector};
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    struct MemoryStore {
        assets: Mutex<Vec<Asset>>,
        sizes: HashMap<String, u64>,
        denied: bool,
    }

    impl MemoryStore {
        fn new(assets: Vec<Asset>, sizes: &[(&str, u64)]) -> Self {
            Self {
                assets: Mutex::new(assets),
                sizes: sizes.iter().map(|(id, s)| (id.to_string(), *s)).collect(),
                denied: false,
            }
        }
    }

    impl AssetStore for MemoryStore {
        fn list_assets(&self) -> Result<Vec<Asset>, StoreError> {
            if self.denied {
                return Err(StoreError::AuthorizationDenied {
                    reason: "photo access revoked".to_string(),
                });
            }
            let mut assets = self.assets.lock().unwrap().clone();
            sort::sort_by_date(&mut assets);
            Ok(assets)
        }

        fn resource_size(&self, asset: &Asset) -> Result<u64, StoreError> {
            self.sizes
                .get(&asset.id)
                .copied()
                .ok_or_else(|| StoreError::NotFound {
                    id: asset.id.clone(),
                })
        }

        fn delete(&self, asset: &Asset) -> Result<(), StoreError> {
            let mut assets = self.assets.lock().unwrap();
            let before = assets.len();
            assets.retain(|a| a.id != asset.id);
            if assets.len() == before {
                return Err(StoreError::NotFound {
                    id: asset.id.clone(),
                });
            }
            Ok(())
        }
    }

    /// Uses the first character of the id as a one-dimensional fingerprint.
    struct InitialExtractor;

    impl FingerprintExtractor for InitialExtractor {
        fn extract(&self, asset: &Asset) -> Result<FeatureVector, ExtractionError> {
            match asset.id.chars().next() {
                Some(c) if c.is_ascii_alphabetic() => Ok(FeatureVector::new(vec![c as u8 as f32])),
                _ => Err(ExtractionError::Unavailable {
                    id: asset.id.clone(),
                    reason: "no initial".to_string(),
                }),
            }
        }
    }

    fn day(d: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2025, 2, d, 9, 30, 0).unwrap())
    }

    fn sample_library() -> Library<MemoryStore, InitialExtractor> {
        let assets = vec![
            Asset::image("a-beach", "/a1.jpg", day(1)),
            Asset::image("a-beach-2", "/a2.jpg", day(2)),
            Asset::video("b-clip", "/b.mov", day(3), Some(12.0)),
            Asset::image("c-dinner", "/c.jpg", day(4)),
            Asset::image("9-scan", "/9.jpg", None),
        ];
        let store = MemoryStore::new(
            assets,
            &[("a-beach", 300), ("a-beach-2", 100), ("b-clip", 900), ("c-dinner", 200)],
        );
        Library::new(store, SimilarityGrouper::new(InitialExtractor))
    }

    fn ids<S, E>(library: &Library<S, E>) -> Vec<&str> {
        library.assets.iter().map(|a| a.id.as_str()).collect()
    }

    async fn wait_for_sizes<S, E>(library: &Library<S, E>) {
        tokio::time::timeout(
            Duration::from_secs(5),
            library.size_cache.wait_until_complete(),
        )
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_load_lists_newest_first_and_caches_sizes() {
        let mut library = sample_library();
        assert_eq!(library.load().await.unwrap(), 5);
        assert_eq!(
            ids(&library),
            vec!["c-dinner", "b-clip", "a-beach-2", "a-beach", "9-scan"]
        );

        wait_for_sizes(&library).await;
        assert!(library.is_size_caching_complete());
        assert_eq!(library.size_cache().size_of("b-clip"), Some(900));
        assert_eq!(library.size_cache().size_of("9-scan"), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sort_commands() {
        let mut library = sample_library();
        library.load().await.unwrap();
        wait_for_sizes(&library).await;

        let outcome = library.dispatch(LibraryCommand::SortBySize).await;
        assert!(matches!(outcome, CommandOutcome::Sorted(SortOrder::Size)));
        assert_eq!(
            ids(&library),
            vec!["b-clip", "a-beach", "c-dinner", "a-beach-2", "9-scan"]
        );

        library.dispatch(LibraryCommand::SortByVideos).await;
        assert_eq!(ids(&library)[0], "b-clip");
        assert_eq!(&ids(&library)[1..], &["c-dinner", "a-beach-2", "a-beach", "9-scan"]);

        library.dispatch(LibraryCommand::SortByDate).await;
        assert_eq!(
            ids(&library),
            vec!["c-dinner", "b-clip", "a-beach-2", "a-beach", "9-scan"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_find_similar_uses_current_order() {
        let mut library = sample_library();
        library.load().await.unwrap();

        let CommandOutcome::Similar(report) = library.dispatch(LibraryCommand::FindSimilar).await
        else {
            panic!("expected a grouping report");
        };
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].anchor(), "a-beach-2");
        assert_eq!(report.groups[0].duplicates(), &["a-beach".to_string()]);
        assert_eq!(report.extraction_failures, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_delete_removes_from_collection_and_cache() {
        let mut library = sample_library();
        library.load().await.unwrap();
        wait_for_sizes(&library).await;

        let removed = library.delete("c-dinner").unwrap();
        assert_eq!(removed.id, "c-dinner");
        assert!(library.get("c-dinner").is_none());
        assert_eq!(library.size_cache().size_of("c-dinner"), None);
        assert_eq!(library.assets().len(), 4);

        assert!(matches!(
            library.delete("c-dinner"),
            Err(LibraryError::UnknownAsset { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_denied_store_leaves_empty_collection() {
        let mut library = sample_library();
        library.load().await.unwrap();

        library.store = Arc::new(MemoryStore {
            denied: true,
            ..MemoryStore::new(Vec::new(), &[])
        });
        assert!(matches!(
            library.load().await,
            Err(LibraryError::Store(StoreError::AuthorizationDenied { .. }))
        ));
        assert!(library.assets().is_empty());
        assert!(library.is_size_caching_complete());
        assert!(library.find_similar().await.groups.is_empty());

        library.sort_by_size();
        assert!(library.assets().is_empty());
    }
}

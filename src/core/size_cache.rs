use crate::core::asset::Asset;
use crate::core::store::AssetStore;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CachingState {
    Scanning,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeScanProgress {
    pub scan_id: u64,
    pub attempted: usize,
    pub recorded: usize,
    pub total: usize,
    pub state: CachingState,
}

impl SizeScanProgress {
    pub fn is_complete(&self) -> bool {
        self.state == CachingState::Complete
    }
}

#[derive(Default)]
struct Entries {
    sizes: HashMap<String, u64>,
    // Ids removed from the collection during the current scan. Their sizes are
    // never recorded, even if the read was already in flight.
    forgotten: HashSet<String>,
}

struct Shared {
    generation: AtomicU64,
    entries: RwLock<Entries>,
    progress: watch::Sender<SizeScanProgress>,
}

impl Shared {
    fn read_entries(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, scan_id: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == scan_id
    }

    /// Applies one size read from scan `scan_id`. Returns false once the scan
    /// has been superseded; nothing is written in that case.
    fn record_attempt(&self, scan_id: u64, id: String, size: Option<u64>) -> bool {
        let mut entries = self.write_entries();
        if !self.is_current(scan_id) {
            return false;
        }

        let recorded = match size {
            Some(size) if !entries.forgotten.contains(&id) => {
                entries.sizes.insert(id, size);
                true
            }
            _ => false,
        };

        self.progress.send_modify(|progress| {
            progress.attempted += 1;
            if recorded {
                progress.recorded += 1;
            }
        });
        true
    }

    fn finish(&self, scan_id: u64) -> bool {
        let _entries = self.write_entries();
        if !self.is_current(scan_id) {
            return false;
        }

        self.progress
            .send_modify(|progress| progress.state = CachingState::Complete);
        true
    }
}

/// Background-populated map of asset id to on-disk size.
///
/// A scan is started with [`SizeCache::start_scan`]; entries become visible as
/// they are read and [`SizeCache::is_complete`] flips to `true` once every
/// asset has been attempted. Starting another scan discards the previous
/// scan's entries and any writes it has still in flight.
#[derive(Clone)]
pub struct SizeCache {
    shared: Arc<Shared>,
}

impl SizeCache {
    pub fn new() -> Self {
        let (progress, _) = watch::channel(SizeScanProgress {
            scan_id: 0,
            attempted: 0,
            recorded: 0,
            total: 0,
            state: CachingState::Complete,
        });

        Self {
            shared: Arc::new(Shared {
                generation: AtomicU64::new(0),
                entries: RwLock::new(Entries::default()),
                progress,
            }),
        }
    }

    /// Starts a fresh scan and returns its id. Must be called inside a tokio
    /// runtime.
    pub fn start_scan(&self, assets: Vec<Asset>, store: Arc<dyn AssetStore>) -> u64 {
        let total = assets.len();

        let scan_id = {
            let mut entries = self.shared.write_entries();
            let scan_id = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            entries.sizes.clear();
            entries.forgotten.clear();
            self.shared.progress.send_replace(SizeScanProgress {
                scan_id,
                attempted: 0,
                recorded: 0,
                total,
                state: if total == 0 {
                    CachingState::Complete
                } else {
                    CachingState::Scanning
                },
            });
            scan_id
        };

        if total == 0 {
            return scan_id;
        }

        log::info!("Caching sizes for {} assets (scan {})", total, scan_id);
        let shared = self.shared.clone();
        tokio::task::spawn_blocking(move || run_scan(shared, scan_id, assets, store));

        scan_id
    }

    /// Cached size of `id`, or `None` if it has not been read yet or the read
    /// failed.
    pub fn size_of(&self, id: &str) -> Option<u64> {
        self.shared.read_entries().sizes.get(id).copied()
    }

    /// Whether the most recently started scan has attempted every asset.
    pub fn is_complete(&self) -> bool {
        self.shared.progress.borrow().is_complete()
    }

    /// Current progress of the most recently started scan.
    pub fn progress(&self) -> SizeScanProgress {
        self.shared.progress.borrow().clone()
    }

    /// Receiver that is notified after every recorded attempt and on
    /// completion.
    pub fn subscribe(&self) -> watch::Receiver<SizeScanProgress> {
        self.shared.progress.subscribe()
    }

    /// Resolves once the most recently started scan has finished.
    pub async fn wait_until_complete(&self) -> SizeScanProgress {
        let mut rx = self.subscribe();
        let result = rx.wait_for(|progress| progress.is_complete()).await;
        match result {
            Ok(progress) => progress.clone(),
            Err(_) => self.progress(),
        }
    }

    /// Copy of every size cached so far.
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.shared.read_entries().sizes.clone()
    }

    pub fn len(&self) -> usize {
        self.shared.read_entries().sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops the entry for an asset that no longer exists. A scan still
    /// running will not record it again.
    pub fn forget(&self, id: &str) -> Option<u64> {
        let mut entries = self.shared.write_entries();
        entries.forgotten.insert(id.to_string());
        entries.sizes.remove(id)
    }
}

impl Default for SizeCache {
    fn default() -> Self {
        Self::new()
    }
}

fn run_scan(shared: Arc<Shared>, scan_id: u64, assets: Vec<Asset>, store: Arc<dyn AssetStore>) {
    let start_time = Instant::now();
    let total = assets.len();

    for asset in assets {
        if !shared.is_current(scan_id) {
            log::debug!("Size scan {} superseded, stopping", scan_id);
            return;
        }

        let size = match store.resource_size(&asset) {
            Ok(size) => Some(size),
            Err(e) => {
                log::debug!("Failed to read size of {}: {}", asset.id, e);
                None
            }
        };

        if !shared.record_attempt(scan_id, asset.id, size) {
            log::debug!("Size scan {} superseded, dropping its results", scan_id);
            return;
        }
    }

    if shared.finish(scan_id) {
        log::info!(
            "Size scan {} finished: {} assets in {:.2?}",
            scan_id,
            total,
            start_time.elapsed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::StoreError;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Store whose size reads each wait for one token from the test.
    struct GatedStore {
        sizes: HashMap<String, u64>,
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl GatedStore {
        fn new(sizes: &[(&str, u64)]) -> (Arc<Self>, mpsc::Sender<()>) {
            let (tx, rx) = mpsc::channel();
            let store = Arc::new(Self {
                sizes: sizes.iter().map(|(id, s)| (id.to_string(), *s)).collect(),
                gate: Mutex::new(rx),
            });
            (store, tx)
        }
    }

    impl AssetStore for GatedStore {
        fn list_assets(&self) -> Result<Vec<Asset>, StoreError> {
            Ok(Vec::new())
        }

        fn resource_size(&self, asset: &Asset) -> Result<u64, StoreError> {
            let gate = self.gate.lock().unwrap();
            if gate.recv().is_err() {
                return Err(StoreError::AuthorizationDenied {
                    reason: "gate closed".to_string(),
                });
            }
            self.sizes
                .get(&asset.id)
                .copied()
                .ok_or_else(|| StoreError::NotFound {
                    id: asset.id.clone(),
                })
        }

        fn delete(&self, _asset: &Asset) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn assets(ids: &[&str]) -> Vec<Asset> {
        ids.iter()
            .map(|id| Asset::image(*id, format!("/{}.jpg", id), None))
            .collect()
    }

    async fn wait_for_attempts(cache: &SizeCache, attempts: usize) {
        let mut rx = cache.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|p| p.attempted >= attempts),
        )
        .await
        .expect("scan made no progress")
        .unwrap();
    }

    #[test]
    fn test_new_cache_is_idle() {
        let cache = SizeCache::new();
        assert!(cache.is_complete());
        assert!(cache.is_empty());
        assert_eq!(cache.progress().scan_id, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scan_publishes_incrementally_then_completes() {
        let cache = SizeCache::new();
        let (store, gate) = GatedStore::new(&[("a", 10), ("c", 30)]);

        let scan_id = cache.start_scan(assets(&["a", "b", "c"]), store);
        assert!(!cache.is_complete());
        assert_eq!(cache.size_of("a"), None);
        assert_eq!(cache.progress().scan_id, scan_id);
        assert_eq!(cache.progress().total, 3);

        gate.send(()).unwrap();
        wait_for_attempts(&cache, 1).await;
        assert_eq!(cache.size_of("a"), Some(10));
        assert_eq!(cache.size_of("c"), None);
        assert!(!cache.is_complete());

        gate.send(()).unwrap();
        gate.send(()).unwrap();
        let done = tokio::time::timeout(Duration::from_secs(5), cache.wait_until_complete())
            .await
            .unwrap();

        assert!(done.is_complete());
        assert_eq!(done.attempted, 3);
        assert_eq!(done.recorded, 2);
        assert_eq!(cache.size_of("b"), None);
        assert_eq!(cache.size_of("c"), Some(30));
        assert_eq!(cache.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_scan_completes_immediately() {
        let cache = SizeCache::new();
        let (store, _gate) = GatedStore::new(&[]);
        let scan_id = cache.start_scan(Vec::new(), store);
        assert_eq!(scan_id, 1);
        assert!(cache.is_complete());
        assert!(cache.wait_until_complete().await.is_complete());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_new_scan_discards_stale_entries() {
        let cache = SizeCache::new();

        let (old_store, old_gate) = GatedStore::new(&[("old1", 1), ("old2", 2)]);
        cache.start_scan(assets(&["old1", "old2"]), old_store);
        old_gate.send(()).unwrap();
        wait_for_attempts(&cache, 1).await;
        assert_eq!(cache.size_of("old1"), Some(1));

        let (new_store, new_gate) = GatedStore::new(&[("new1", 100)]);
        let second = cache.start_scan(assets(&["new1"]), new_store);
        assert!(!cache.is_complete());
        assert_eq!(cache.size_of("old1"), None);

        // Let the superseded scan read its remaining asset.
        old_gate.send(()).unwrap();
        new_gate.send(()).unwrap();
        let done = tokio::time::timeout(Duration::from_secs(5), cache.wait_until_complete())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(done.scan_id, second);
        assert_eq!(cache.size_of("new1"), Some(100));
        assert_eq!(cache.size_of("old2"), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.progress().total, 1);
        assert_eq!(cache.progress().attempted, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_forget_removes_entry() {
        let cache = SizeCache::new();
        let (store, gate) = GatedStore::new(&[("x", 42)]);
        cache.start_scan(assets(&["x"]), store);
        gate.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), cache.wait_until_complete())
            .await
            .unwrap();

        assert_eq!(cache.forget("x"), Some(42));
        assert_eq!(cache.size_of("x"), None);
        assert!(cache.is_complete());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_forgotten_asset_is_not_recorded_by_running_scan() {
        let cache = SizeCache::new();
        let (store, gate) = GatedStore::new(&[("x", 1), ("y", 2)]);
        cache.start_scan(assets(&["x", "y"]), store);

        assert_eq!(cache.forget("y"), None);
        gate.send(()).unwrap();
        gate.send(()).unwrap();
        let done = tokio::time::timeout(Duration::from_secs(5), cache.wait_until_complete())
            .await
            .unwrap();

        assert_eq!(done.attempted, 2);
        assert_eq!(done.recorded, 1);
        assert_eq!(cache.size_of("x"), Some(1));
        assert_eq!(cache.size_of("y"), None);
        assert!(!cache.snapshot().contains_key("y"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rescan_clears_forgotten_ids() {
        let cache = SizeCache::new();
        let (store, gate) = GatedStore::new(&[("x", 7)]);
        cache.start_scan(assets(&["x"]), store.clone());
        cache.forget("x");
        gate.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), cache.wait_until_complete())
            .await
            .unwrap();
        assert_eq!(cache.size_of("x"), None);

        cache.start_scan(assets(&["x"]), store);
        gate.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), cache.wait_until_complete())
            .await
            .unwrap();
        assert_eq!(cache.size_of("x"), Some(7));
    }
}

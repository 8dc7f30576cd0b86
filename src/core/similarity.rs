// Similarity grouping
//
// Anchor-rooted greedy clustering in a single pass over the input order:
// - each unprocessed asset anchors a candidate group
// - every other unprocessed asset joins if it is within the threshold of the anchor
// - candidates with a single member are dropped
//
// Membership is relative to the anchor only. Two non-anchor members of the same
// group may be further apart than the threshold.

use crate::core::asset::Asset;
use crate::core::fingerprint::{FeatureVector, FingerprintExtractor};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Distances strictly below this value count as "similar".
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.5;

/// Ids of visually similar assets. The first id is the anchor the others were
/// compared against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimilarityGroup {
    ids: Vec<String>,
}

impl SimilarityGroup {
    fn new(ids: Vec<String>) -> Self {
        debug_assert!(ids.len() > 1);
        Self { ids }
    }

    pub fn anchor(&self) -> &str {
        &self.ids[0]
    }

    pub fn members(&self) -> &[String] {
        &self.ids
    }

    /// Members other than the anchor.
    pub fn duplicates(&self) -> &[String] {
        &self.ids[1..]
    }

    /// Number of members, anchor included. Always at least 2.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|member| member == id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupingReport {
    pub groups: Vec<SimilarityGroup>,
    pub assets_considered: usize,
    pub extraction_failures: usize,
}

pub struct SimilarityGrouper<E> {
    extractor: E,
    threshold: f32,
    workers: usize,
}

impl<E: FingerprintExtractor> SimilarityGrouper<E> {
    /// Sequential grouper using [`DEFAULT_SIMILARITY_THRESHOLD`].
    pub fn new(extractor: E) -> Self {
        Self {
            extractor,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            workers: 1,
        }
    }

    /// Sets the distance below which a candidate joins an anchor's group.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Number of threads used to extract fingerprints. `1` extracts in input
    /// order on the calling thread.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    /// Groups `assets` in input order. Assets whose fingerprint cannot be
    /// extracted are left out of every group.
    pub fn group(&self, assets: &[Asset]) -> Vec<SimilarityGroup> {
        self.group_with_report(assets).groups
    }

    /// Like [`SimilarityGrouper::group`], also counting the assets that were
    /// considered and the ones that failed extraction.
    pub fn group_with_report(&self, assets: &[Asset]) -> GroupingReport {
        if assets.len() < 2 {
            return GroupingReport {
                groups: Vec::new(),
                assets_considered: assets.len(),
                extraction_failures: 0,
            };
        }

        log::info!("Fingerprinting {} assets", assets.len());
        let fingerprints = self.extract_all(assets);
        let extraction_failures = fingerprints.iter().filter(|fp| fp.is_none()).count();

        let groups = cluster(assets, &fingerprints, self.threshold);
        log::info!(
            "Found {} similarity group(s) among {} assets ({} could not be fingerprinted)",
            groups.len(),
            assets.len(),
            extraction_failures
        );

        GroupingReport {
            groups,
            assets_considered: assets.len(),
            extraction_failures,
        }
    }

    /// One fingerprint per asset, in input order.
    fn extract_all(&self, assets: &[Asset]) -> Vec<Option<FeatureVector>> {
        if self.workers > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .build()
            {
                Ok(pool) => {
                    return pool.install(|| {
                        assets
                            .par_iter()
                            .map(|asset| self.extract_one(asset))
                            .collect()
                    });
                }
                Err(e) => {
                    log::warn!("Could not start extraction pool, extracting sequentially: {}", e);
                }
            }
        }

        assets.iter().map(|asset| self.extract_one(asset)).collect()
    }

    fn extract_one(&self, asset: &Asset) -> Option<FeatureVector> {
        match self.extractor.extract(asset) {
            Ok(fingerprint) => Some(fingerprint),
            Err(e) => {
                log::warn!("Failed to fingerprint {}: {}", asset.id, e);
                None
            }
        }
    }
}

impl<E: FingerprintExtractor + 'static> SimilarityGrouper<E> {
    /// Runs a grouping pass over `assets` on the blocking pool and waits for it.
    pub async fn group_async(self: Arc<Self>, assets: Vec<Asset>) -> GroupingReport {
        let count = assets.len();
        match tokio::task::spawn_blocking(move || self.group_with_report(&assets)).await {
            Ok(report) => report,
            Err(e) => {
                log::error!("Similarity grouping over {} assets did not finish: {}", count, e);
                GroupingReport {
                    assets_considered: count,
                    ..GroupingReport::default()
                }
            }
        }
    }
}

fn cluster(
    assets: &[Asset],
    fingerprints: &[Option<FeatureVector>],
    threshold: f32,
) -> Vec<SimilarityGroup> {
    let mut processed: HashSet<&str> = HashSet::with_capacity(assets.len());
    let mut groups = Vec::new();

    for (i, anchor) in assets.iter().enumerate() {
        if processed.contains(anchor.id.as_str()) {
            continue;
        }

        let mut members = vec![anchor.id.clone()];

        // An anchor without a fingerprint can never gather members.
        if let Some(anchor_fp) = &fingerprints[i] {
            for (j, candidate) in assets.iter().enumerate() {
                if candidate.id == anchor.id || processed.contains(candidate.id.as_str()) {
                    continue;
                }

                let Some(candidate_fp) = &fingerprints[j] else {
                    continue;
                };

                let distance = anchor_fp.distance(candidate_fp);
                log::trace!("{} vs {}: distance={:.4}", anchor.id, candidate.id, distance);

                if distance < threshold {
                    members.push(candidate.id.clone());
                    processed.insert(candidate.id.as_str());
                }
            }
        }

        if members.len() > 1 {
            groups.push(SimilarityGroup::new(members));
        }
        processed.insert(anchor.id.as_str());
    }

    groups
}

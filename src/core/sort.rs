// In-place orderings over the asset collection. All orderings are descending
// and stable; equal keys keep their relative order.

use crate::core::asset::{Asset, MediaKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Stand-in for a missing creation date. Undated assets sort as the oldest.
pub const MISSING_TIMESTAMP_SENTINEL: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Date,
    Size,
    #[serde(alias = "videos")]
    Kind,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Date => write!(f, "date"),
            SortOrder::Size => write!(f, "size"),
            SortOrder::Kind => write!(f, "kind"),
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "date" => Ok(SortOrder::Date),
            "size" => Ok(SortOrder::Size),
            "kind" | "videos" => Ok(SortOrder::Kind),
            other => Err(format!(
                "unknown sort order '{}', expected date, size or kind",
                other
            )),
        }
    }
}

fn timestamp(asset: &Asset) -> DateTime<Utc> {
    asset.created_at.unwrap_or(MISSING_TIMESTAMP_SENTINEL)
}

fn newest_first(a: &Asset, b: &Asset) -> Ordering {
    timestamp(b).cmp(&timestamp(a))
}

fn kind_rank(kind: MediaKind) -> u8 {
    match kind {
        MediaKind::Video => 0,
        MediaKind::Image => 1,
    }
}

pub fn sort_by_date(assets: &mut [Asset]) {
    assets.sort_by(newest_first);
}

/// Largest first. Assets without a known size count as zero bytes.
pub fn sort_by_size<F>(assets: &mut [Asset], size_of: F)
where
    F: Fn(&str) -> Option<u64>,
{
    assets.sort_by_cached_key(|asset| std::cmp::Reverse(size_of(&asset.id).unwrap_or(0)));
}

/// Videos before images, newest first within each kind.
pub fn sort_by_media_kind_then_date(assets: &mut [Asset]) {
    assets.sort_by(|a, b| {
        kind_rank(a.media_kind)
            .cmp(&kind_rank(b.media_kind))
            .then_with(|| newest_first(a, b))
    });
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => f.pad("image"),
            MediaKind::Video => f.pad("video"),
        }
    }
}

/// One photo or video in the library.
///
/// `id` is the stable identity every side table (sizes, fingerprints) is keyed
/// by. `path` is only meaningful to the store and extractor that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub path: PathBuf,
    pub created_at: Option<DateTime<Utc>>,
    pub media_kind: MediaKind,
    pub duration_seconds: Option<f64>,
}

impl Asset {
    pub fn image(
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        created_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            created_at,
            media_kind: MediaKind::Image,
            duration_seconds: None,
        }
    }

    pub fn video(
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        created_at: Option<DateTime<Utc>>,
        duration_seconds: Option<f64>,
    ) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            created_at,
            media_kind: MediaKind::Video,
            duration_seconds,
        }
    }

    pub fn is_video(&self) -> bool {
        self.media_kind == MediaKind::Video
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Playback length as `m:ss`. Images and videos of unknown length yield an
    /// empty string.
    pub fn duration_label(&self) -> String {
        match (self.media_kind, self.duration_seconds) {
            (MediaKind::Video, Some(seconds)) if seconds.is_finite() && seconds >= 0.0 => {
                let whole = seconds as u64;
                format!("{}:{:02}", whole / 60, whole % 60)
            }
            _ => String::new(),
        }
    }
}

/// Human readable file size using decimal units, e.g. `1.5 MB`.
pub fn format_byte_count(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];

    if bytes < 1000 {
        return if bytes == 1 {
            "1 byte".to_string()
        } else {
            format!("{} bytes", bytes)
        };
    }

    let mut value = bytes as f64 / 1000.0;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }

    if value >= 100.0 {
        format!("{:.0} {}", value, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

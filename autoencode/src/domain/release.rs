//! Release items and the metadata resolved for them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Marker used by release groups for compilation uploads.
const BATCH_MARKER: &str = "[Batch]";

/// Episode key used in the persisted record when no ordinal was resolved.
const UNKNOWN_EPISODE: &str = "unknown";

/// One discovered unit of work.
///
/// Created at discovery time and owned by exactly one pipeline controller.
/// Only its outcome is persisted.
#[derive(Debug, Clone)]
pub struct ReleaseItem {
    /// Correlation id used by the task registry.
    pub id: String,
    /// Stable series identifier, unknown until metadata is resolved.
    pub series_id: Option<String>,
    /// Episode ordinal, unknown until metadata is resolved.
    pub episode: Option<u32>,
    pub display_name: String,
    /// Magnet link, URL or local path of the payload.
    pub locator: String,
    /// Bypass in-flight, completed and persisted deduplication.
    pub forced: bool,
    pub cancel: CancellationToken,
}

impl ReleaseItem {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        locator: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            series_id: None,
            episode: None,
            display_name: display_name.into(),
            locator: locator.into(),
            forced: false,
            cancel,
        }
    }

    pub fn forced(mut self, forced: bool) -> Self {
        self.forced = forced;
        self
    }

    /// Compilation releases are never encoded.
    pub fn is_batch(&self) -> bool {
        self.display_name.contains(BATCH_MARKER)
    }

    /// Key used for in-memory and persisted deduplication.
    ///
    /// Falls back to the cleaned title when no series id was resolved so
    /// that two discoveries of the same unresolved show still collide.
    pub fn series_key(&self) -> String {
        match &self.series_id {
            Some(id) => id.clone(),
            None => format!("title:{}", fallback_title(&self.display_name).to_lowercase()),
        }
    }

    pub fn episode_key(&self) -> String {
        self.episode
            .map(|ep| ep.to_string())
            .unwrap_or_else(|| UNKNOWN_EPISODE.to_string())
    }
}

/// Result of a metadata lookup. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    pub series_id: Option<String>,
    pub episode: Option<u32>,
    pub title: Option<String>,
    pub poster_url: Option<String>,
    pub caption: Option<String>,
    /// Output file name per quality label.
    #[serde(default)]
    pub filenames: HashMap<String, String>,
}

impl ReleaseMetadata {
    /// Metadata derived from the display name alone.
    pub fn fallback(display_name: &str) -> Self {
        Self {
            title: Some(fallback_title(display_name)),
            ..Default::default()
        }
    }

    pub fn filename_for(&self, label: &str) -> Option<&str> {
        self.filenames
            .get(label)
            .map(String::as_str)
            .filter(|name| !name.trim().is_empty())
    }

    /// Caption for the release card, with a plain fallback.
    pub fn caption_or_default(&self, display_name: &str) -> String {
        match self.caption.as_deref().map(str::trim) {
            Some(caption) if !caption.is_empty() => caption.to_string(),
            _ => {
                let name = if display_name.trim().is_empty() {
                    "Unknown"
                } else {
                    display_name
                };
                format!("‣ Anime Name : {}", name)
            }
        }
    }
}

/// Strip bracketed tags and extension noise from a release name.
pub fn fallback_title(display_name: &str) -> String {
    let mut out = String::with_capacity(display_name.len());
    let mut depth = 0usize;
    for ch in display_name.chars() {
        match ch {
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }

    let trimmed = out.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = trimmed
        .strip_suffix(".mkv")
        .or_else(|| trimmed.strip_suffix(".mp4"))
        .unwrap_or(&trimmed)
        .trim()
        .to_string();

    if trimmed.is_empty() {
        display_name.trim().to_string()
    } else {
        trimmed
    }
}

/// A `(display name, locator)` pair produced by a discovery source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discovery {
    pub display_name: String,
    pub locator: String,
}

impl Discovery {
    pub fn new(display_name: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            locator: locator.into(),
        }
    }
}

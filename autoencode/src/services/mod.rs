//! External collaborators consumed by the pipeline.
//!
//! The pipeline only depends on the traits defined here. Reference
//! implementations backed by the local filesystem and plain HTTP live in the
//! submodules so the binary runs end to end without any hosted service.

mod container;
mod discovery;
mod downloader;
mod publisher;
mod resolver;
mod store;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::domain::{Discovery, QualityTarget, ReleaseMetadata};

pub use container::ServiceContainer;
pub use discovery::WatchDirDiscovery;
pub use downloader::HttpDownloader;
pub(crate) use downloader::sanitize_file_name;
pub use publisher::{OutboxPublisher, PostedStatus};
pub use resolver::NameResolver;
pub use store::{JsonEpisodeStore, MemoryEpisodeStore};

/// Opaque handle of a posted status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatusHandle(pub i64);

impl std::fmt::Display for StatusHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A status message to post: text plus an optional poster image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPost {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
}

impl StatusPost {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            poster_url: None,
        }
    }

    pub fn with_poster(mut self, poster_url: Option<String>) -> Self {
        self.poster_url = poster_url;
        self
    }
}

/// One link button attached to a status message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkButton {
    pub label: String,
    pub url: String,
}

/// What the transport reports back after an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub remote_id: i64,
    pub size_bytes: u64,
}

/// Persisted `episode -> quality -> done` mapping for one series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeRecord {
    episodes: BTreeMap<String, BTreeMap<String, bool>>,
}

impl EpisodeRecord {
    pub fn is_done(&self, episode: &str, quality: &str) -> bool {
        self.episodes
            .get(episode)
            .and_then(|q| q.get(quality))
            .copied()
            .unwrap_or(false)
    }

    /// True when every label in `qualities` is marked done for `episode`.
    pub fn all_done<'a>(&self, episode: &str, qualities: impl IntoIterator<Item = &'a str>) -> bool {
        let Some(done) = self.episodes.get(episode) else {
            return false;
        };
        qualities
            .into_iter()
            .all(|q| done.get(q).copied().unwrap_or(false))
    }

    pub fn mark_done(&mut self, episode: &str, quality: &str) {
        self.episodes
            .entry(episode.to_string())
            .or_default()
            .insert(quality.to_string(), true);
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }
}

/// Resolves catalog metadata for a release name.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// May return partially filled metadata; the pipeline fills gaps.
    async fn resolve(&self, display_name: &str) -> Result<ReleaseMetadata>;
}

/// Materializes a release payload on the local filesystem.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, locator: &str, display_name: &str) -> Result<PathBuf>;
}

/// Publishing transport: status messages and artifact uploads.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn post_status(&self, post: StatusPost) -> Result<StatusHandle>;

    async fn edit_status(
        &self,
        handle: StatusHandle,
        text: &str,
        buttons: &[Vec<LinkButton>],
    ) -> Result<()>;

    async fn upload(&self, path: &Path, quality: &QualityTarget) -> Result<UploadReceipt>;

    async fn delete_status(&self, handle: StatusHandle) -> Result<()>;
}

/// Durable record of which (series, episode, quality) triples are done.
#[async_trait]
pub trait EpisodeStore: Send + Sync {
    async fn get_episode_record(&self, series_id: &str) -> Result<EpisodeRecord>;

    async fn save_episode_record(
        &self,
        series_id: &str,
        episode: &str,
        quality: &str,
        locator_id: i64,
    ) -> Result<()>;
}

/// Produces newly discovered releases.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    fn name(&self) -> &str;

    async fn poll(&self) -> Result<Vec<Discovery>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_record_all_done() {
        let mut record = EpisodeRecord::default();
        assert!(!record.all_done("5", ["720", "480"]));

        record.mark_done("5", "720");
        assert!(record.is_done("5", "720"));
        assert!(!record.all_done("5", ["720", "480"]));

        record.mark_done("5", "480");
        assert!(record.all_done("5", ["720", "480"]));
        assert!(!record.all_done("6", ["720"]));
    }

    #[test]
    fn test_episode_record_json_shape() {
        let mut record = EpisodeRecord::default();
        record.mark_done("1", "720");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, serde_json::json!({"1": {"720": true}}));
    }

    #[test]
    fn test_status_post_builder() {
        let post = StatusPost::text("caption").with_poster(Some("https://img/1.jpg".to_string()));
        assert_eq!(post.text, "caption");
        assert_eq!(post.poster_url.as_deref(), Some("https://img/1.jpg"));
    }
}

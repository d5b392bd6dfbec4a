//! Episode record stores.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{EpisodeRecord, EpisodeStore};
use crate::Result;

/// Everything persisted for one series.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SeriesEntry {
    #[serde(default)]
    episodes: EpisodeRecord,
    /// Status message id the episode was published under.
    #[serde(default)]
    locators: BTreeMap<String, i64>,
}

impl SeriesEntry {
    fn record(&mut self, episode: &str, quality: &str, locator_id: i64) {
        self.episodes.mark_done(episode, quality);
        self.locators.insert(episode.to_string(), locator_id);
    }
}

/// In-memory store, useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryEpisodeStore {
    series: parking_lot::Mutex<HashMap<String, SeriesEntry>>,
    saves: parking_lot::Mutex<Vec<(String, String, String, i64)>>,
}

impl MemoryEpisodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every save in call order as `(series, episode, quality, locator_id)`.
    pub fn saves(&self) -> Vec<(String, String, String, i64)> {
        self.saves.lock().clone()
    }
}

#[async_trait]
impl EpisodeStore for MemoryEpisodeStore {
    async fn get_episode_record(&self, series_id: &str) -> Result<EpisodeRecord> {
        Ok(self
            .series
            .lock()
            .get(series_id)
            .map(|entry| entry.episodes.clone())
            .unwrap_or_default())
    }

    async fn save_episode_record(
        &self,
        series_id: &str,
        episode: &str,
        quality: &str,
        locator_id: i64,
    ) -> Result<()> {
        self.series
            .lock()
            .entry(series_id.to_string())
            .or_default()
            .record(episode, quality, locator_id);
        self.saves.lock().push((
            series_id.to_string(),
            episode.to_string(),
            quality.to_string(),
            locator_id,
        ));
        Ok(())
    }
}

/// Store backed by a single JSON document, rewritten on every save.
///
/// The document is loaded lazily on first access and cached; writes go to a
/// sibling temp file which is then renamed over the original.
pub struct JsonEpisodeStore {
    path: PathBuf,
    cache: Mutex<Option<HashMap<String, SeriesEntry>>>,
}

impl JsonEpisodeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(path: &Path) -> Result<HashMap<String, SeriesEntry>> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(HashMap::new()),
            Ok(raw) => {
                let data: HashMap<String, SeriesEntry> = serde_json::from_str(&raw)?;
                info!(path = %path.display(), series = data.len(), "Loaded episode store");
                Ok(data)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, data: &HashMap<String, SeriesEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let raw = serde_json::to_vec_pretty(data)?;
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl EpisodeStore for JsonEpisodeStore {
    async fn get_episode_record(&self, series_id: &str) -> Result<EpisodeRecord> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(Self::load(&self.path).await?);
        }
        Ok(cache
            .as_ref()
            .and_then(|data| data.get(series_id))
            .map(|entry| entry.episodes.clone())
            .unwrap_or_default())
    }

    async fn save_episode_record(
        &self,
        series_id: &str,
        episode: &str,
        quality: &str,
        locator_id: i64,
    ) -> Result<()> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(Self::load(&self.path).await?);
        }
        let data = cache.get_or_insert_with(HashMap::new);

        data.entry(series_id.to_string())
            .or_default()
            .record(episode, quality, locator_id);
        self.persist(data).await?;

        debug!(series = %series_id, episode = %episode, quality = %quality, "Episode record saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryEpisodeStore::new();
        store.save_episode_record("s1", "3", "720", 42).await.unwrap();

        let record = store.get_episode_record("s1").await.unwrap();
        assert!(record.is_done("3", "720"));
        assert!(!record.is_done("3", "480"));
        assert!(store.get_episode_record("s2").await.unwrap().is_empty());
        assert_eq!(
            store.saves(),
            vec![("s1".to_string(), "3".to_string(), "720".to_string(), 42)]
        );
    }

    #[tokio::test]
    async fn test_json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("episodes.json");

        let store = JsonEpisodeStore::new(&path);
        assert!(store.get_episode_record("s1").await.unwrap().is_empty());
        store.save_episode_record("s1", "1", "720", 7).await.unwrap();
        store.save_episode_record("s1", "1", "480", 7).await.unwrap();

        let reopened = JsonEpisodeStore::new(&path);
        let record = reopened.get_episode_record("s1").await.unwrap();
        assert!(record.all_done("1", ["720", "480"]));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episodes.json");
        tokio::fs::write(&path, "{broken").await.unwrap();

        let store = JsonEpisodeStore::new(&path);
        assert!(matches!(
            store.get_episode_record("s1").await,
            Err(crate::Error::Serialization(_))
        ));
    }
}

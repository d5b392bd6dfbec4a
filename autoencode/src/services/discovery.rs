//! Directory-watching discovery source.

use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashSet;
use tracing::{debug, trace};

use super::DiscoverySource;
use crate::Result;
use crate::domain::Discovery;

/// Default extensions picked up by [`WatchDirDiscovery`].
const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4"];

/// Emits each video file that appears in a directory exactly once.
///
/// The locator is the file path, which the HTTP downloader copies as a
/// local payload.
pub struct WatchDirDiscovery {
    name: String,
    dir: PathBuf,
    seen: DashSet<PathBuf>,
}

impl WatchDirDiscovery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            name: format!("watch:{}", dir.display()),
            dir,
            seen: DashSet::new(),
        }
    }
}

#[async_trait]
impl DiscoverySource for WatchDirDiscovery {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self) -> Result<Vec<Discovery>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(dir = %self.dir.display(), "Watch directory does not exist yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_video = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if !is_video || !entry.file_type().await?.is_file() {
                continue;
            }
            if !self.seen.insert(path.clone()) {
                continue;
            }

            let display_name = entry.file_name().to_string_lossy().to_string();
            debug!(source = %self.name, name = %display_name, "Discovered release");
            found.push(Discovery::new(display_name, path.to_string_lossy()));
        }

        found.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(found)
    }
}

//! Downloader for HTTP(S) URLs and local files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::Downloader;
use crate::{Error, Result};

/// Fetches `http(s)://` payloads with reqwest and copies local paths
/// (plain or `file://`) into the download directory.
///
/// Torrent locators are rejected as transfer failures; they need a
/// dedicated downloader.
pub struct HttpDownloader {
    download_dir: PathBuf,
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn target_path(&self, display_name: &str, fallback: &str) -> PathBuf {
        let name = sanitize_file_name(display_name);
        let name = if name.is_empty() {
            sanitize_file_name(fallback)
        } else {
            name
        };
        let name = if name.is_empty() {
            "download.bin".to_string()
        } else {
            name
        };
        self.download_dir.join(name)
    }

    async fn fetch_http(&self, url: &str, display_name: &str) -> Result<PathBuf> {
        let last_segment = url.rsplit('/').next().unwrap_or_default();
        let target = self.target_path(display_name, last_segment);

        info!(url = %url, target = %target.display(), "Downloading");

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::transfer(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }

        let mut file = tokio::fs::File::create(&target).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    remove_partial(&target).await;
                    return Err(e.into());
                }
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        if written == 0 {
            remove_partial(&target).await;
            return Err(Error::transfer(format!("{} returned an empty body", url)));
        }

        debug!(bytes = written, target = %target.display(), "Download finished");
        Ok(target)
    }

    async fn fetch_local(&self, source: &Path, display_name: &str) -> Result<PathBuf> {
        let metadata = tokio::fs::metadata(source)
            .await
            .map_err(|e| Error::transfer(format!("{}: {}", source.display(), e)))?;
        if !metadata.is_file() || metadata.len() == 0 {
            return Err(Error::transfer(format!(
                "{} is not a non-empty file",
                source.display()
            )));
        }

        let fallback = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let target = self.target_path(display_name, &fallback);

        info!(source = %source.display(), target = %target.display(), "Copying local payload");
        tokio::fs::copy(source, &target).await?;
        Ok(target)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, locator: &str, display_name: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.download_dir).await?;

        if locator.starts_with("http://") || locator.starts_with("https://") {
            return self.fetch_http(locator, display_name).await;
        }
        if locator.starts_with("magnet:") {
            return Err(Error::transfer("magnet locators are not supported"));
        }

        let path = locator.strip_prefix("file://").unwrap_or(locator);
        self.fetch_local(Path::new(path), display_name).await
    }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove partial download");
    }
}

/// Make a display name safe to use as a single path component.
pub(crate) fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim().trim_matches('.').trim().to_string()
}

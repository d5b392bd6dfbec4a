//! Service container for dependency injection.
//!
//! The ServiceContainer holds the collaborators every pipeline controller
//! talks to. It is cheap to clone; each service sits behind an `Arc`.

use std::sync::Arc;

use tracing::info;

use super::{
    Downloader, EpisodeStore, HttpDownloader, JsonEpisodeStore, MetadataResolver, NameResolver,
    OutboxPublisher, Publisher,
};
use crate::config::AppConfig;

/// Service container holding the pipeline's external collaborators.
#[derive(Clone)]
pub struct ServiceContainer {
    /// Catalog metadata lookup.
    pub resolver: Arc<dyn MetadataResolver>,
    /// Payload fetcher.
    pub downloader: Arc<dyn Downloader>,
    /// Status messages and artifact uploads.
    pub publisher: Arc<dyn Publisher>,
    /// Persisted episode record.
    pub store: Arc<dyn EpisodeStore>,
}

impl ServiceContainer {
    pub fn new(
        resolver: Arc<dyn MetadataResolver>,
        downloader: Arc<dyn Downloader>,
        publisher: Arc<dyn Publisher>,
        store: Arc<dyn EpisodeStore>,
    ) -> Self {
        Self {
            resolver,
            downloader,
            publisher,
            store,
        }
    }

    /// Build the filesystem and HTTP backed services described by `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        info!("Initializing service container");

        let resolver = Arc::new(NameResolver::new(config.qualities.clone()));
        let downloader = Arc::new(HttpDownloader::new(&config.download_dir));
        let publisher = Arc::new(OutboxPublisher::new(&config.publish.outbox_dir));
        let store = Arc::new(JsonEpisodeStore::new(&config.store_path));

        info!(
            download_dir = %config.download_dir.display(),
            outbox_dir = %config.publish.outbox_dir.display(),
            store = %config.store_path.display(),
            "Service container initialized"
        );

        Self::new(resolver, downloader, publisher, store)
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer").finish_non_exhaustive()
    }
}

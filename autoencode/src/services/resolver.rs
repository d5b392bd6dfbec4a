use async_trait::async_trait;

use super::MetadataResolver;
use crate::Result;
use crate::domain::{QualitySet, ReleaseMetadata, fallback_title};

/// Offline resolver that derives everything from the release name.
///
/// It never knows a series id or episode ordinal, so deduplication falls
/// back to the cleaned title. Output names follow `"<title> [<badge>].mkv"`.
#[derive(Debug, Clone)]
pub struct NameResolver {
    qualities: QualitySet,
}

impl NameResolver {
    pub fn new(qualities: QualitySet) -> Self {
        Self { qualities }
    }
}

#[async_trait]
impl MetadataResolver for NameResolver {
    async fn resolve(&self, display_name: &str) -> Result<ReleaseMetadata> {
        let title = fallback_title(display_name);
        let mut metadata = ReleaseMetadata::fallback(display_name);
        for quality in &self.qualities {
            metadata.filenames.insert(
                quality.label.clone(),
                format!("{} [{}].mkv", title, quality.badge()),
            );
        }
        Ok(metadata)
    }
}

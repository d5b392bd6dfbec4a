//! Publish stage: upload an artifact and attach its link to the release card.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tracing::{debug, info, warn};

use super::encoder::EncodedArtifact;
use super::status::format_bytes;
use crate::config::PublishConfig;
use crate::domain::{PublishedLink, QualityTarget};
use crate::services::{LinkButton, Publisher, StatusHandle};
use crate::{Error, Result};

/// Maximum buttons per row on the release card.
const BUTTONS_PER_ROW: usize = 2;

/// Link buttons accumulated for one release, in quality order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkBoard {
    rows: Vec<Vec<LinkButton>>,
}

impl LinkBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a button, filling the last row before starting a new one.
    pub fn push(&mut self, button: LinkButton) {
        match self.rows.last_mut() {
            Some(row) if row.len() < BUTTONS_PER_ROW => row.push(button),
            _ => self.rows.push(vec![button]),
        }
    }

    pub fn rows(&self) -> &[Vec<LinkButton>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Shareable deep link for an uploaded artifact.
///
/// The payload is `"get-<remote_id * |file_store_id|>"`, base64url encoded
/// without padding.
pub fn share_link(link_base: &str, remote_id: i64, file_store_id: i64) -> String {
    let key = (remote_id as i128) * (file_store_id as i128).abs();
    let payload = URL_SAFE_NO_PAD.encode(format!("get-{}", key));
    format!("{}?start={}", link_base, payload)
}

/// Button text: `"<badge> - <size>"`.
pub fn button_label(badge: &str, size_bytes: u64) -> String {
    format!("{} - {}", badge, format_bytes(size_bytes as f64))
}

/// Uploads artifacts through the publisher and keeps the card's buttons
/// in sync.
pub struct PublishStage {
    publisher: Arc<dyn Publisher>,
    config: PublishConfig,
}

impl PublishStage {
    pub fn new(publisher: Arc<dyn Publisher>, config: PublishConfig) -> Self {
        Self { publisher, config }
    }

    pub async fn publish(
        &self,
        artifact: &EncodedArtifact,
        quality: &QualityTarget,
        card: StatusHandle,
        caption: &str,
        board: &mut LinkBoard,
    ) -> Result<PublishedLink> {
        let receipt = self
            .publisher
            .upload(&artifact.path, quality)
            .await
            .map_err(|e| match e {
                Error::Transfer(_) | Error::Cancelled => e,
                other => Error::transfer(format!("upload of {} failed: {}", quality.label, other)),
            })?;

        let url = share_link(&self.config.link_base, receipt.remote_id, self.config.file_store_id);
        let label = button_label(&quality.badge(), receipt.size_bytes);
        debug!(quality = %quality.label, remote_id = receipt.remote_id, url = %url, "Link built");

        board.push(LinkButton {
            label: label.clone(),
            url: url.clone(),
        });
        self.publisher.edit_status(card, caption, board.rows()).await?;

        if !self.config.keep_artifacts
            && let Err(e) = tokio::fs::remove_file(&artifact.path).await
        {
            warn!(artifact = %artifact.path.display(), error = %e, "Failed to remove artifact");
        }

        info!(quality = %quality.label, size_bytes = receipt.size_bytes, "Published");
        Ok(PublishedLink {
            quality: quality.label.clone(),
            label,
            size_bytes: receipt.size_bytes,
            remote_id: receipt.remote_id,
            url,
        })
    }
}

//! Filesystem publisher.
//!
//! Stands in for a chat transport: status messages are kept in memory and
//! mirrored to `statuses.json`, uploads are copied into the outbox directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{LinkButton, Publisher, StatusHandle, StatusPost, UploadReceipt};
use crate::domain::QualityTarget;
use crate::{Error, Result};

const STATUS_FILE: &str = "statuses.json";

/// Last known content of a posted status message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedStatus {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub buttons: Vec<Vec<LinkButton>>,
}

pub struct OutboxPublisher {
    outbox_dir: PathBuf,
    next_id: AtomicI64,
    statuses: parking_lot::Mutex<BTreeMap<StatusHandle, PostedStatus>>,
}

impl OutboxPublisher {
    pub fn new(outbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            outbox_dir: outbox_dir.into(),
            next_id: AtomicI64::new(1),
            statuses: parking_lot::Mutex::new(BTreeMap::new()),
        }
    }

    pub fn status(&self, handle: StatusHandle) -> Option<PostedStatus> {
        self.statuses.lock().get(&handle).cloned()
    }

    /// Live status messages ordered by handle.
    pub fn statuses(&self) -> Vec<(StatusHandle, PostedStatus)> {
        self.statuses
            .lock()
            .iter()
            .map(|(h, s)| (*h, s.clone()))
            .collect()
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn mirror(&self) -> Result<()> {
        let raw = {
            let statuses = self.statuses.lock();
            let by_id: BTreeMap<String, &PostedStatus> =
                statuses.iter().map(|(h, s)| (h.to_string(), s)).collect();
            serde_json::to_vec_pretty(&by_id)?
        };
        tokio::fs::create_dir_all(&self.outbox_dir).await?;
        tokio::fs::write(self.outbox_dir.join(STATUS_FILE), raw).await?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for OutboxPublisher {
    async fn post_status(&self, post: StatusPost) -> Result<StatusHandle> {
        let handle = StatusHandle(self.allocate_id());
        self.statuses.lock().insert(
            handle,
            PostedStatus {
                text: post.text,
                poster_url: post.poster_url,
                buttons: Vec::new(),
            },
        );
        self.mirror().await?;
        debug!(handle = %handle, "Status posted");
        Ok(handle)
    }

    async fn edit_status(
        &self,
        handle: StatusHandle,
        text: &str,
        buttons: &[Vec<LinkButton>],
    ) -> Result<()> {
        {
            let mut statuses = self.statuses.lock();
            let status = statuses
                .get_mut(&handle)
                .ok_or_else(|| Error::other(format!("unknown status message {}", handle)))?;
            status.text = text.to_string();
            status.buttons = buttons.to_vec();
        }
        self.mirror().await
    }

    async fn upload(&self, path: &Path, quality: &QualityTarget) -> Result<UploadReceipt> {
        let file_name = path
            .file_name()
            .ok_or_else(|| Error::transfer(format!("{} has no file name", path.display())))?;
        let size_bytes = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::transfer(format!("{}: {}", path.display(), e)))?
            .len();

        tokio::fs::create_dir_all(&self.outbox_dir).await?;
        let target = self.outbox_dir.join(file_name);
        tokio::fs::copy(path, &target).await?;

        let remote_id = self.allocate_id();
        info!(
            quality = %quality.label,
            remote_id,
            size_bytes,
            target = %target.display(),
            "Artifact uploaded"
        );
        Ok(UploadReceipt {
            remote_id,
            size_bytes,
        })
    }

    async fn delete_status(&self, handle: StatusHandle) -> Result<()> {
        if self.statuses.lock().remove(&handle).is_none() {
            warn!(handle = %handle, "Deleting unknown status message");
        }
        self.mirror().await
    }
}

//! Per-quality job state owned by a single pipeline controller.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Stage of one (item, quality) job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Pending,
    Encoding,
    Publishing,
    Persisted,
    /// No output name could be derived; the quality was passed over.
    Skipped,
    Failed,
    Cancelled,
}

impl JobStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Persisted | Self::Skipped | Self::Failed | Self::Cancelled
        )
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Encoding => "encoding",
            Self::Publishing => "publishing",
            Self::Persisted => "persisted",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A published artifact and the shareable link built for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedLink {
    pub quality: String,
    pub label: String,
    pub size_bytes: u64,
    pub remote_id: i64,
    pub url: String,
}

/// State of one (item, quality) job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeJobState {
    pub quality: String,
    pub stage: JobStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<PublishedLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EncodeJobState {
    pub fn pending(quality: impl Into<String>) -> Self {
        Self {
            quality: quality.into(),
            stage: JobStage::Pending,
            artifact: None,
            link: None,
            error: None,
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.stage = JobStage::Failed;
        self.error = Some(error.into());
    }
}

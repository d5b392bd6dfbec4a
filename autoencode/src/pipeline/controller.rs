//! Per-item pipeline controller.
//!
//! One controller owns one [`ReleaseItem`] from discovery to a terminal
//! state:
//!
//! 1. skip batches, resolve metadata, claim the series and run the
//!    idempotence checks,
//! 2. post the release card and a status message, download the payload,
//! 3. wait for admission,
//! 4. for every quality in declared order: encode, publish, persist,
//! 5. release the encoder and clean up.
//!
//! Cancellation is checked at every stage boundary. Any failure aborts the
//! remaining qualities; already published qualities stay published.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

use super::admission::{AdmissionQueue, AdmissionToken};
use super::encoder::{EncodeRequest, Encoder};
use super::progress::{ProgressReporter, ProgressUpdate};
use super::publish::{LinkBoard, PublishStage};
use super::registry::ControllerState;
use super::series::SeriesTracker;
use super::status;
use crate::config::PublishConfig;
use crate::domain::{EncodeJobState, JobStage, QualitySet, ReleaseItem, ReleaseMetadata};
use crate::services::{ServiceContainer, StatusHandle, StatusPost};
use crate::{Error, Result};

/// Capacity of the per-encode progress channel.
const PROGRESS_CHANNEL_CAPACITY: usize = 8;

/// Everything controllers share.
pub struct PipelineContext {
    pub qualities: QualitySet,
    pub services: ServiceContainer,
    pub encoder: Arc<dyn Encoder>,
    pub admission: Arc<AdmissionQueue>,
    pub series: Arc<SeriesTracker>,
    pub publish: PublishConfig,
}

/// Why an item was passed over without doing any work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Compilation release.
    Batch,
    /// Another controller is processing the same series.
    InFlight,
    /// The series finished earlier in this process.
    AlreadyCompleted,
    /// Every quality of the episode is already recorded as done.
    AlreadyPersisted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Completed,
    Skipped(SkipReason),
    Failed(String),
    Cancelled,
}

impl PipelineOutcome {
    fn terminal_state(&self) -> ControllerState {
        match self {
            Self::Completed => ControllerState::Completed,
            Self::Skipped(_) => ControllerState::Skipped,
            Self::Failed(_) => ControllerState::Failed,
            Self::Cancelled => ControllerState::Cancelled,
        }
    }
}

/// Summary of one controller run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub id: String,
    pub display_name: String,
    pub series: Option<String>,
    pub episode: Option<u32>,
    pub outcome: PipelineOutcome,
    /// Per-quality state in declared order. Empty when the item never
    /// reached admission.
    pub jobs: Vec<EncodeJobState>,
}

/// Phase names used in failure notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Prepare,
    Download,
    Encode,
    Upload,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Prepare => "Prepare",
            Self::Download => "Download",
            Self::Encode => "Encode",
            Self::Upload => "Upload",
        }
    }
}

/// Side effects that must be cleaned up whatever the outcome.
#[derive(Debug)]
struct Resources {
    status: Option<StatusHandle>,
    download: Option<PathBuf>,
    phase: Phase,
}

pub struct PipelineController {
    ctx: Arc<PipelineContext>,
    item: ReleaseItem,
    state: watch::Sender<ControllerState>,
    jobs: Vec<EncodeJobState>,
}

impl PipelineController {
    pub fn new(
        ctx: Arc<PipelineContext>,
        item: ReleaseItem,
        state: watch::Sender<ControllerState>,
    ) -> Self {
        Self {
            ctx,
            item,
            state,
            jobs: Vec::new(),
        }
    }

    /// Drive the item to a terminal state. Never returns an error; failures
    /// are folded into the report.
    #[instrument(skip(self), fields(id = %self.item.id, item = %self.item.display_name))]
    pub async fn run(mut self) -> PipelineReport {
        info!(forced = self.item.forced, "Pipeline started");

        let mut resources = Resources {
            status: None,
            download: None,
            phase: Phase::Prepare,
        };

        // The execute future is dropped here, releasing the permit and the
        // series claim even when it panicked.
        let result = AssertUnwindSafe(self.execute(&mut resources))
            .catch_unwind()
            .await;

        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) if e.is_cancelled() => PipelineOutcome::Cancelled,
            Ok(Err(e)) => {
                error!(phase = resources.phase.as_str(), error = %e, "Pipeline failed");
                PipelineOutcome::Failed(e.to_string())
            }
            Err(payload) => {
                let message = format!("controller panicked: {}", panic_message(&*payload));
                error!(phase = resources.phase.as_str(), error = %message, "Pipeline panicked");
                for job in self.jobs.iter_mut().filter(|j| {
                    matches!(j.stage, JobStage::Encoding | JobStage::Publishing)
                }) {
                    job.fail(message.clone());
                }
                PipelineOutcome::Failed(message)
            }
        };

        self.finalize(&mut resources, &outcome).await;
        self.state.send_replace(outcome.terminal_state());

        match &outcome {
            PipelineOutcome::Completed => info!("Pipeline completed"),
            PipelineOutcome::Skipped(reason) => info!(?reason, "Pipeline skipped"),
            PipelineOutcome::Cancelled => info!("Pipeline cancelled"),
            PipelineOutcome::Failed(_) => {}
        }

        PipelineReport {
            id: self.item.id.clone(),
            display_name: self.item.display_name.clone(),
            series: self.item.series_id.clone(),
            episode: self.item.episode,
            outcome,
            jobs: self.jobs,
        }
    }

    fn checkpoint(&self) -> Result<()> {
        if self.item.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn set_state(&self, state: ControllerState) {
        self.state.send_replace(state);
    }

    async fn resolve_metadata(&self) -> ReleaseMetadata {
        match self
            .ctx
            .services
            .resolver
            .resolve(&self.item.display_name)
            .await
        {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(error = %e, "Metadata lookup failed, using fallback");
                ReleaseMetadata::fallback(&self.item.display_name)
            }
        }
    }

    async fn execute(&mut self, res: &mut Resources) -> Result<PipelineOutcome> {
        if self.item.is_batch() {
            return Ok(PipelineOutcome::Skipped(SkipReason::Batch));
        }

        let metadata = self.resolve_metadata().await;
        self.item.series_id = metadata.series_id.clone();
        self.item.episode = metadata.episode;
        let series_key = self.item.series_key();
        let episode_key = self.item.episode_key();
        let forced = self.item.forced;

        let Some(claim) = self.ctx.series.claim(&series_key, forced) else {
            return Ok(PipelineOutcome::Skipped(SkipReason::InFlight));
        };
        debug!(series = claim.key(), owner = claim.is_owner(), "Series claimed");
        if !forced && self.ctx.series.is_completed(&series_key) {
            return Ok(PipelineOutcome::Skipped(SkipReason::AlreadyCompleted));
        }
        if !forced {
            let record = self
                .ctx
                .services
                .store
                .get_episode_record(&series_key)
                .await?;
            if record.all_done(&episode_key, self.ctx.qualities.labels()) {
                self.ctx.series.mark_completed(&series_key);
                return Ok(PipelineOutcome::Skipped(SkipReason::AlreadyPersisted));
            }
        }
        self.checkpoint()?;

        let publisher = Arc::clone(&self.ctx.services.publisher);
        let caption = metadata.caption_or_default(&self.item.display_name);
        let card = publisher
            .post_status(StatusPost::text(caption.clone()).with_poster(metadata.poster_url.clone()))
            .await?;
        res.status = Some(
            publisher
                .post_status(StatusPost::text(status::DOWNLOADING))
                .await?,
        );

        res.phase = Phase::Download;
        let download = self
            .ctx
            .services
            .downloader
            .fetch(&self.item.locator, &self.item.display_name)
            .await
            .map_err(|e| match e {
                Error::Transfer(_) | Error::Cancelled => e,
                other => Error::transfer(other.to_string()),
            })?;
        res.download = Some(download.clone());
        match tokio::fs::metadata(&download).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            _ => {
                return Err(Error::transfer(format!(
                    "download produced no usable file at {}",
                    download.display()
                )));
            }
        }
        self.checkpoint()?;

        res.phase = Phase::Encode;
        let token = AdmissionToken::from(card);
        if self.ctx.admission.is_busy() {
            self.edit_status(res, status::QUEUED).await;
        }
        let ticket = self.ctx.admission.enqueue(token)?;
        self.set_state(ControllerState::Queued);
        debug!(token = %ticket.token(), "Waiting for admission");
        let permit = ticket.wait(&self.item.cancel).await?;
        debug!(token = %permit.token(), "Encoder acquired");

        self.jobs = self
            .ctx
            .qualities
            .iter()
            .map(|q| EncodeJobState::pending(q.label.clone()))
            .collect();

        let ctx = Arc::clone(&self.ctx);
        let stage = PublishStage::new(Arc::clone(&publisher), ctx.publish.clone());
        let mut board = LinkBoard::new();
        let total = ctx.qualities.len();

        for (index, quality) in ctx.qualities.iter().enumerate() {
            self.checkpoint()?;

            let Some(target_name) = metadata.filename_for(&quality.label) else {
                warn!(quality = %quality.label, "No output name derived, skipping quality");
                self.jobs[index].stage = JobStage::Skipped;
                continue;
            };

            res.phase = Phase::Encode;
            self.jobs[index].stage = JobStage::Encoding;
            self.set_state(ControllerState::Encoding {
                quality: quality.label.clone(),
            });
            self.edit_status(res, &status::encoding_text(&self.item.display_name, &quality.badge()))
                .await;

            let request = EncodeRequest {
                source: download.clone(),
                target_name: target_name.to_string(),
                quality: quality.clone(),
            };
            let artifact = match self.encode_with_progress(res, &request, index, total).await {
                Ok(artifact) => artifact,
                Err(e) => {
                    self.mark_job_error(index, &e);
                    return Err(e);
                }
            };
            self.jobs[index].artifact = Some(artifact.path.clone());

            if let Err(e) = self.checkpoint() {
                self.jobs[index].stage = JobStage::Cancelled;
                remove_file_quietly(&artifact.path).await;
                return Err(e);
            }

            res.phase = Phase::Upload;
            self.jobs[index].stage = JobStage::Publishing;
            self.set_state(ControllerState::Publishing {
                quality: quality.label.clone(),
            });
            self.edit_status(res, &status::uploading_text(&self.item.display_name, &quality.badge()))
                .await;

            let link = match stage
                .publish(&artifact, quality, card, &caption, &mut board)
                .await
            {
                Ok(link) => link,
                Err(e) => {
                    self.mark_job_error(index, &e);
                    remove_file_quietly(&artifact.path).await;
                    return Err(e);
                }
            };

            if let Err(e) = ctx
                .services
                .store
                .save_episode_record(&series_key, &episode_key, &quality.label, card.0)
                .await
            {
                self.mark_job_error(index, &e);
                return Err(e);
            }

            self.jobs[index].link = Some(link);
            self.jobs[index].stage = JobStage::Persisted;
        }

        drop(permit);
        self.ctx.series.mark_completed(&series_key);
        Ok(PipelineOutcome::Completed)
    }

    /// Run the encoder while forwarding its progress to the status message.
    async fn encode_with_progress(
        &self,
        res: &Resources,
        request: &EncodeRequest,
        index: usize,
        total: usize,
    ) -> Result<super::encoder::EncodedArtifact> {
        let (tx, mut rx) = mpsc::channel::<ProgressUpdate>(PROGRESS_CHANNEL_CAPACITY);
        let reporter = ProgressReporter::new(request.quality.label.clone(), tx);

        let encode = async {
            let result = self
                .ctx
                .encoder
                .encode(request, &reporter, &self.item.cancel)
                .await;
            drop(reporter);
            result
        };
        let forward = async {
            while let Some(update) = rx.recv().await {
                let text = status::progress_text(
                    &self.item.display_name,
                    &update.snapshot,
                    index,
                    total,
                );
                self.edit_status(res, &text).await;
            }
        };

        let (result, ()) = tokio::join!(encode, forward);
        result
    }

    fn mark_job_error(&mut self, index: usize, error: &Error) {
        let job = &mut self.jobs[index];
        if error.is_cancelled() {
            job.stage = JobStage::Cancelled;
        } else {
            job.fail(error.to_string());
        }
    }

    /// Best-effort status edit; transport hiccups never fail the item.
    async fn edit_status(&self, res: &Resources, text: &str) {
        let Some(handle) = res.status else {
            return;
        };
        if let Err(e) = self
            .ctx
            .services
            .publisher
            .edit_status(handle, text, &[])
            .await
        {
            debug!(error = %e, "Status edit failed");
        }
    }

    async fn finalize(&self, res: &mut Resources, outcome: &PipelineOutcome) {
        let publisher = &self.ctx.services.publisher;

        if let Some(handle) = res.status.take() {
            let result = match outcome {
                PipelineOutcome::Failed(_) => {
                    publisher
                        .edit_status(handle, &status::failed_text(res.phase.as_str()), &[])
                        .await
                }
                _ => publisher.delete_status(handle).await,
            };
            if let Err(e) = result {
                warn!(error = %e, "Failed to settle status message");
            }
        }

        if let Some(path) = res.download.take() {
            remove_file_quietly(&path).await;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn remove_file_quietly(path: &std::path::Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

//! Encode stage: one external encoder run for one (item, quality) pair.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::progress::{ProgressReporter, ProgressTracker, effective_duration};
use crate::config::EncoderConfig;
use crate::domain::QualityTarget;
use crate::services::sanitize_file_name;
use crate::{Error, Result};

/// Fixed name the source is staged under while the encoder runs.
const STAGED_INPUT: &str = "autoencode_in.mkv";

/// Fixed name the encoder writes to before the artifact is renamed.
const STAGED_OUTPUT: &str = "autoencode_out.mkv";

/// Number of trailing stderr lines kept for failure reports.
const STDERR_TAIL_LINES: usize = 20;

/// What to encode.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    /// Downloaded payload. Restored to this path after every run.
    pub source: PathBuf,
    /// File name of the final artifact.
    pub target_name: String,
    pub quality: QualityTarget,
}

/// A finished encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedArtifact {
    pub quality: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Runs one encode.
///
/// Implementations must return `Error::Cancelled` promptly once `cancel`
/// fires and leave `request.source` where they found it.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(
        &self,
        request: &EncodeRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<EncodedArtifact>;
}

/// Encoder driving an external process built from the quality's command
/// template, with progress read from ffmpeg's `-progress` scratch file.
pub struct FfmpegEncoder {
    config: EncoderConfig,
    poll_interval: Duration,
}

enum Exit {
    Finished(ExitStatus),
    Cancelled,
}

impl FfmpegEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        let poll_interval = config.poll_interval();
        Self {
            config,
            poll_interval,
        }
    }

    /// Override the progress poll cadence.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn staged_input(&self) -> PathBuf {
        self.config.work_dir.join(STAGED_INPUT)
    }

    fn staged_output(&self) -> PathBuf {
        self.config.work_dir.join(STAGED_OUTPUT)
    }

    /// Probe the media duration in seconds with ffprobe.
    async fn probe_duration(&self, input: &Path) -> Option<f64> {
        let output = process_utils::tokio_command(&self.config.ffprobe_path)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let raw = String::from_utf8_lossy(&output.stdout);
                raw.trim().parse::<f64>().ok()
            }
            Ok(output) => {
                debug!(code = ?output.status.code(), "ffprobe failed");
                None
            }
            Err(e) => {
                debug!(error = %e, "ffprobe could not be spawned");
                None
            }
        }
    }

    async fn reset_progress_file(&self) -> Result<PathBuf> {
        let path = self.config.progress_path();
        remove_if_exists(&path).await?;
        tokio::fs::File::create(&path).await?;
        Ok(path)
    }

    /// Run the encoder against the already staged input.
    async fn run_staged(
        &self,
        request: &EncodeRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<EncodedArtifact> {
        let quality = &request.quality;
        let input = self.staged_input();
        let output = self.staged_output();
        let progress_path = self.reset_progress_file().await?;
        remove_if_exists(&output).await?;

        let duration = effective_duration(
            self.probe_duration(&input).await,
            self.config.fallback_duration_secs,
        );

        let line = quality.render_command(&self.config.ffmpeg_path, &input, &progress_path, &output);
        debug!(quality = %quality.label, command = %line, duration, "Spawning encoder");

        let mut child = process_utils::tokio_shell(&line)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Encode {
                quality: quality.label.clone(),
                code: None,
                diagnostics: format!("failed to spawn encoder: {}", e),
            })?;

        let stderr_tail = child.stderr.take().map(|stderr| capture_tail(stderr, quality.label.clone()));

        let tracker = ProgressTracker::new(duration, Instant::now());
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut scratch_ended = false;

        let exit = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Exit::Cancelled,
                status = child.wait() => break Exit::Finished(status?),
                _ = ticker.tick(), if !scratch_ended => {
                    if let Ok(contents) = tokio::fs::read_to_string(&progress_path).await
                        && !contents.is_empty()
                    {
                        let snapshot = tracker.next_snapshot(&contents);
                        scratch_ended = snapshot.finished;
                        progress.report(snapshot);
                    }
                }
            }
        };

        let status = match exit {
            Exit::Finished(status) => status,
            Exit::Cancelled => {
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "Encoder already exited");
                }
                let _ = child.wait().await;
                if let Some(task) = stderr_tail {
                    task.abort();
                }
                remove_if_exists(&output).await.ok();
                info!(quality = %quality.label, "Encode cancelled");
                return Err(Error::Cancelled);
            }
        };

        let diagnostics = match stderr_tail {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            remove_if_exists(&output).await.ok();
            warn!(quality = %quality.label, code = ?status.code(), "Encoder exited unsuccessfully");
            return Err(Error::Encode {
                quality: quality.label.clone(),
                code: status.code(),
                diagnostics: if diagnostics.is_empty() {
                    "no diagnostics captured".to_string()
                } else {
                    diagnostics
                },
            });
        }

        let size_bytes = match tokio::fs::metadata(&output).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => meta.len(),
            _ => {
                return Err(Error::MissingOutput {
                    quality: quality.label.clone(),
                    path: output.display().to_string(),
                });
            }
        };

        let target = self.config.work_dir.join(sanitize_file_name(&request.target_name));
        tokio::fs::rename(&output, &target).await?;

        info!(
            quality = %quality.label,
            artifact = %target.display(),
            size_bytes,
            "Encode finished"
        );
        Ok(EncodedArtifact {
            quality: quality.label.clone(),
            path: target,
            size_bytes,
        })
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(
        &self,
        request: &EncodeRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<EncodedArtifact> {
        match tokio::fs::metadata(&request.source).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            _ => {
                return Err(Error::validation(format!(
                    "source {} is missing or empty",
                    request.source.display()
                )));
            }
        }
        if sanitize_file_name(&request.target_name).is_empty() {
            return Err(Error::validation("target name is empty"));
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let staged = self.staged_input();
        tokio::fs::rename(&request.source, &staged).await?;

        let result = self.run_staged(request, progress, cancel).await;

        if let Err(e) = tokio::fs::rename(&staged, &request.source).await {
            warn!(
                source = %request.source.display(),
                error = %e,
                "Failed to restore staged source"
            );
            if result.is_ok() {
                return Err(e.into());
            }
        }
        result
    }
}

/// Read stderr to EOF, keeping the last lines.
fn capture_tail(
    stderr: tokio::process::ChildStderr,
    quality: String,
) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.to_lowercase().contains("error") {
                warn!(quality = %quality, "encoder: {}", line);
            } else {
                debug!(quality = %quality, "encoder: {}", line);
            }
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        tail.into_iter().collect::<Vec<_>>().join("\n")
    })
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

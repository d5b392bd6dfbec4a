//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use autoencode::config::AppConfig;
use autoencode::domain::{QualitySet, QualityTarget, ReleaseMetadata};
use autoencode::pipeline::{
    ControllerState, EncodeRequest, EncodedArtifact, Encoder, PipelineManager, ProgressReporter,
    ProgressTracker,
};
use autoencode::services::{
    Downloader, EpisodeRecord, EpisodeStore, LinkButton, MemoryEpisodeStore, MetadataResolver,
    Publisher, ServiceContainer, StatusHandle, StatusPost, UploadReceipt,
};
use autoencode::{Error, Result};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Ordered log of interesting events across collaborators.
#[derive(Clone, Default)]
pub struct EventLog(Arc<parking_lot::Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == event)
    }
}

/// Output name the scripted resolver derives for `(name, label)`.
pub fn target_name(display_name: &str, label: &str) -> String {
    format!("{} [{}p].mkv", display_name, label)
}

#[derive(Clone)]
pub enum Behavior {
    Succeed,
    Fail,
    /// Wait for cancellation.
    Block,
    /// Wait for the notify, then succeed.
    Gate(Arc<Notify>),
    /// Produce the artifact, then cancel the item before returning.
    CancelOnFinish,
    Panic,
}

pub struct ScriptedEncoder {
    out_dir: PathBuf,
    delay: Duration,
    behaviors: parking_lot::Mutex<HashMap<String, Behavior>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: parking_lot::Mutex<Vec<String>>,
    log: EventLog,
}

impl ScriptedEncoder {
    pub fn new(out_dir: PathBuf, delay: Duration, log: EventLog) -> Self {
        Self {
            out_dir,
            delay,
            behaviors: parking_lot::Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: parking_lot::Mutex::new(Vec::new()),
            log,
        }
    }

    /// Script the behavior for an output name or a bare quality label.
    pub fn set(&self, key: impl Into<String>, behavior: Behavior) {
        self.behaviors.lock().insert(key.into(), behavior);
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Output names in the order encodes started.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn behavior_for(&self, request: &EncodeRequest) -> Behavior {
        let behaviors = self.behaviors.lock();
        behaviors
            .get(&request.target_name)
            .or_else(|| behaviors.get(&request.quality.label))
            .cloned()
            .unwrap_or(Behavior::Succeed)
    }

    async fn produce(&self, request: &EncodeRequest, cancel: &CancellationToken) -> Result<EncodedArtifact> {
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        }
        let path = self.out_dir.join(&request.target_name);
        tokio::fs::write(&path, vec![0u8; 64]).await?;
        Ok(EncodedArtifact {
            quality: request.quality.label.clone(),
            path,
            size_bytes: 64,
        })
    }

    async fn run(
        &self,
        request: &EncodeRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<EncodedArtifact> {
        assert!(request.source.exists(), "source must be staged on disk");

        let tracker = ProgressTracker::new(10.0, Instant::now());
        progress.report(tracker.snapshot_at(
            "out_time_us=5000000\ntotal_size=2048\nprogress=continue\n",
            Duration::from_secs(1),
        ));

        match self.behavior_for(request) {
            Behavior::Succeed => self.produce(request, cancel).await,
            Behavior::Fail => Err(Error::Encode {
                quality: request.quality.label.clone(),
                code: Some(1),
                diagnostics: "scripted failure".to_string(),
            }),
            Behavior::Block => {
                cancel.cancelled().await;
                Err(Error::Cancelled)
            }
            Behavior::Gate(gate) => {
                tokio::select! {
                    _ = gate.notified() => self.produce(request, cancel).await,
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                }
            }
            Behavior::CancelOnFinish => {
                let artifact = self.produce(request, cancel).await?;
                cancel.cancel();
                Ok(artifact)
            }
            Behavior::Panic => panic!("encoder exploded on {}", request.target_name),
        }
    }
}

#[async_trait]
impl Encoder for ScriptedEncoder {
    async fn encode(
        &self,
        request: &EncodeRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<EncodedArtifact> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.calls.lock().push(request.target_name.clone());
        self.log.push(format!("encode-start:{}", request.target_name));

        let result = self.run(request, progress, cancel).await;

        self.log.push(format!("encode-end:{}", request.target_name));
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Resolver returning a series id per display name and filenames for every
/// configured label.
pub struct ScriptedResolver {
    labels: Vec<String>,
    overrides: parking_lot::Mutex<HashMap<String, ReleaseMetadata>>,
}

impl ScriptedResolver {
    pub fn new(labels: &[&str]) -> Self {
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            overrides: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn metadata(&self, display_name: &str) -> ReleaseMetadata {
        ReleaseMetadata {
            series_id: Some(format!("series:{}", display_name)),
            episode: Some(1),
            title: Some(display_name.to_string()),
            poster_url: Some(format!("https://img.example/{}.jpg", display_name)),
            caption: None,
            filenames: self
                .labels
                .iter()
                .map(|l| (l.clone(), target_name(display_name, l)))
                .collect(),
        }
    }

    pub fn set(&self, display_name: &str, metadata: ReleaseMetadata) {
        self.overrides.lock().insert(display_name.to_string(), metadata);
    }
}

#[async_trait]
impl MetadataResolver for ScriptedResolver {
    async fn resolve(&self, display_name: &str) -> Result<ReleaseMetadata> {
        if let Some(meta) = self.overrides.lock().get(display_name) {
            return Ok(meta.clone());
        }
        Ok(self.metadata(display_name))
    }
}

pub struct ScriptedDownloader {
    dir: PathBuf,
    failing: parking_lot::Mutex<Vec<String>>,
    ghosts: parking_lot::Mutex<Vec<String>>,
    fetched: parking_lot::Mutex<Vec<PathBuf>>,
}

impl ScriptedDownloader {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            failing: parking_lot::Mutex::new(Vec::new()),
            ghosts: parking_lot::Mutex::new(Vec::new()),
            fetched: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn fail_for(&self, display_name: &str) {
        self.failing.lock().push(display_name.to_string());
    }

    /// Report success for `display_name` without writing anything.
    pub fn ghost_for(&self, display_name: &str) {
        self.ghosts.lock().push(display_name.to_string());
    }

    pub fn fetched(&self) -> Vec<PathBuf> {
        self.fetched.lock().clone()
    }
}

#[async_trait]
impl Downloader for ScriptedDownloader {
    async fn fetch(&self, _locator: &str, display_name: &str) -> Result<PathBuf> {
        if self.failing.lock().iter().any(|n| n == display_name) {
            return Err(Error::transfer("tracker returned no peers"));
        }
        let path = self.dir.join(format!("{}.src", display_name));
        if self.ghosts.lock().iter().any(|n| n == display_name) {
            return Ok(path);
        }
        tokio::fs::write(&path, b"payload").await?;
        self.fetched.lock().push(path.clone());
        Ok(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub handle: StatusHandle,
    pub text: String,
    pub buttons: Vec<Vec<LinkButton>>,
}

pub struct RecordingPublisher {
    next_id: AtomicI64,
    posts: parking_lot::Mutex<Vec<(StatusHandle, StatusPost)>>,
    edits: parking_lot::Mutex<Vec<Edit>>,
    uploads: parking_lot::Mutex<Vec<(PathBuf, String)>>,
    deleted: parking_lot::Mutex<Vec<StatusHandle>>,
    sizes: parking_lot::Mutex<HashMap<String, u64>>,
    failing_uploads: parking_lot::Mutex<Vec<String>>,
    log: EventLog,
}

impl RecordingPublisher {
    pub fn new(log: EventLog) -> Self {
        Self {
            next_id: AtomicI64::new(100),
            posts: parking_lot::Mutex::new(Vec::new()),
            edits: parking_lot::Mutex::new(Vec::new()),
            uploads: parking_lot::Mutex::new(Vec::new()),
            deleted: parking_lot::Mutex::new(Vec::new()),
            sizes: parking_lot::Mutex::new(HashMap::new()),
            failing_uploads: parking_lot::Mutex::new(Vec::new()),
            log,
        }
    }

    /// Report `size` for uploads of `label` instead of the file size.
    pub fn set_size(&self, label: &str, size: u64) {
        self.sizes.lock().insert(label.to_string(), size);
    }

    /// Make uploads of `label` fail.
    pub fn fail_uploads_for(&self, label: &str) {
        self.failing_uploads.lock().push(label.to_string());
    }

    pub fn posts(&self) -> Vec<(StatusHandle, StatusPost)> {
        self.posts.lock().clone()
    }

    pub fn edits(&self) -> Vec<Edit> {
        self.edits.lock().clone()
    }

    pub fn edits_for(&self, handle: StatusHandle) -> Vec<Edit> {
        self.edits
            .lock()
            .iter()
            .filter(|e| e.handle == handle)
            .cloned()
            .collect()
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.uploads.lock().clone()
    }

    pub fn deleted(&self) -> Vec<StatusHandle> {
        self.deleted.lock().clone()
    }

    /// Handle of the release card posted for `display_name` with the default
    /// caption.
    pub fn card_for(&self, display_name: &str) -> Option<StatusHandle> {
        self.posts
            .lock()
            .iter()
            .find(|(_, post)| post.text.ends_with(&format!(": {}", display_name)))
            .map(|(handle, _)| *handle)
    }

    /// Handle of the status message posted right after the card.
    ///
    /// None of these mocks yield, so a controller posts its card and status
    /// message back to back and their ids are adjacent.
    pub fn status_for(&self, display_name: &str) -> Option<StatusHandle> {
        self.card_for(display_name).map(|card| StatusHandle(card.0 + 1))
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn post_status(&self, post: StatusPost) -> Result<StatusHandle> {
        let handle = StatusHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.posts.lock().push((handle, post));
        Ok(handle)
    }

    async fn edit_status(
        &self,
        handle: StatusHandle,
        text: &str,
        buttons: &[Vec<LinkButton>],
    ) -> Result<()> {
        self.edits.lock().push(Edit {
            handle,
            text: text.to_string(),
            buttons: buttons.to_vec(),
        });
        Ok(())
    }

    async fn upload(&self, path: &Path, quality: &QualityTarget) -> Result<UploadReceipt> {
        if self.failing_uploads.lock().contains(&quality.label) {
            return Err(Error::transfer("upload rejected"));
        }
        let file_size = tokio::fs::metadata(path).await?.len();
        let size_bytes = self
            .sizes
            .lock()
            .get(&quality.label)
            .copied()
            .unwrap_or(file_size);
        self.uploads
            .lock()
            .push((path.to_path_buf(), quality.label.clone()));
        self.log.push(format!(
            "upload:{}",
            path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
        ));
        Ok(UploadReceipt {
            remote_id: self.next_id.fetch_add(1, Ordering::SeqCst),
            size_bytes,
        })
    }

    async fn delete_status(&self, handle: StatusHandle) -> Result<()> {
        self.deleted.lock().push(handle);
        Ok(())
    }
}

/// Memory store that also logs every save.
pub struct RecordingStore {
    inner: Arc<MemoryEpisodeStore>,
    log: EventLog,
}

impl RecordingStore {
    pub fn new(inner: Arc<MemoryEpisodeStore>, log: EventLog) -> Self {
        Self { inner, log }
    }
}

#[async_trait]
impl EpisodeStore for RecordingStore {
    async fn get_episode_record(&self, series_id: &str) -> Result<EpisodeRecord> {
        self.inner.get_episode_record(series_id).await
    }

    async fn save_episode_record(
        &self,
        series_id: &str,
        episode: &str,
        quality: &str,
        locator_id: i64,
    ) -> Result<()> {
        self.log.push(format!("save:{}:{}", series_id, quality));
        self.inner
            .save_episode_record(series_id, episode, quality, locator_id)
            .await
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub config: AppConfig,
    pub manager: Arc<PipelineManager>,
    pub encoder: Arc<ScriptedEncoder>,
    pub resolver: Arc<ScriptedResolver>,
    pub downloader: Arc<ScriptedDownloader>,
    pub publisher: Arc<RecordingPublisher>,
    pub store: Arc<MemoryEpisodeStore>,
    pub log: EventLog,
}

pub fn config_for(labels: &[&str]) -> AppConfig {
    let targets = labels
        .iter()
        .map(|l| QualityTarget::new(*l, "{ffmpeg} -i {input} {output}"))
        .collect();
    let mut config = AppConfig {
        qualities: QualitySet::new(targets).expect("valid quality set"),
        ..Default::default()
    };
    config.publish.link_base = "https://telegram.me/test_bot".to_string();
    config
}

impl Harness {
    pub fn new(labels: &[&str]) -> Self {
        Self::with_store(labels, Arc::new(MemoryEpisodeStore::new()), Duration::from_millis(10))
    }

    pub fn with_delay(labels: &[&str], delay: Duration) -> Self {
        Self::with_store(labels, Arc::new(MemoryEpisodeStore::new()), delay)
    }

    pub fn with_store(labels: &[&str], store: Arc<MemoryEpisodeStore>, delay: Duration) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = EventLog::default();
        let config = config_for(labels);

        let encoder = Arc::new(ScriptedEncoder::new(dir.path().to_path_buf(), delay, log.clone()));
        let resolver = Arc::new(ScriptedResolver::new(labels));
        let downloader = Arc::new(ScriptedDownloader::new(dir.path().to_path_buf()));
        let publisher = Arc::new(RecordingPublisher::new(log.clone()));
        let recording_store = Arc::new(RecordingStore::new(Arc::clone(&store), log.clone()));

        let services = ServiceContainer::new(
            resolver.clone(),
            downloader.clone(),
            publisher.clone(),
            recording_store,
        );
        let manager = Arc::new(PipelineManager::new(&config, services, encoder.clone()));
        manager.start();

        Self {
            dir,
            config,
            manager,
            encoder,
            resolver,
            downloader,
            publisher,
            store,
            log,
        }
    }
}

/// Poll until the controller reports a state matching `pred`.
pub async fn wait_for_state(
    manager: &PipelineManager,
    id: &str,
    pred: impl Fn(&ControllerState) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if manager.status(id).as_ref().is_some_and(&pred) {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {id}, last state {:?}",
            manager.status(id)
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn encoding(label: &str) -> impl Fn(&ControllerState) -> bool + '_ {
    move |state| matches!(state, ControllerState::Encoding { quality } if quality == label)
}

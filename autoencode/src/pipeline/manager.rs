//! Pipeline Manager implementation.
//!
//! Entry point of the core: accepts submissions, spawns one controller per
//! item, runs the admitter and discovery loops, and coordinates shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::admission::AdmissionQueue;
use super::controller::{PipelineContext, PipelineController, PipelineReport};
use super::discovery::DiscoveryLoop;
use super::encoder::Encoder;
use super::registry::{ControllerHandle, ControllerState, TaskRegistry};
use super::series::SeriesTracker;
use crate::config::{AppConfig, DiscoveryConfig};
use crate::domain::ReleaseItem;
use crate::services::{DiscoverySource, ServiceContainer};
use crate::{Error, Result};

/// A request to process one release.
#[derive(Debug, Clone)]
pub struct Submission {
    pub display_name: String,
    pub locator: String,
    pub forced: bool,
    /// Caller-held token; cancelling it cancels the controller.
    pub cancel: Option<CancellationToken>,
}

impl Submission {
    pub fn new(display_name: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            locator: locator.into(),
            forced: false,
            cancel: None,
        }
    }

    pub fn forced(mut self, forced: bool) -> Self {
        self.forced = forced;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Handle to a spawned controller.
#[derive(Debug)]
pub struct PipelineHandle {
    pub id: String,
    join: JoinHandle<PipelineReport>,
}

impl PipelineHandle {
    /// Wait for the controller's report.
    pub async fn join(self) -> Result<PipelineReport> {
        self.join
            .await
            .map_err(|e| Error::other(format!("controller {} crashed: {}", self.id, e)))
    }
}

pub struct PipelineManager {
    ctx: Arc<PipelineContext>,
    registry: Arc<TaskRegistry>,
    /// Parent of every controller token.
    controllers_token: CancellationToken,
    /// Stops the admitter and discovery loops.
    cancellation_token: CancellationToken,
    accepting: AtomicBool,
    background: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl PipelineManager {
    pub fn new(config: &AppConfig, services: ServiceContainer, encoder: Arc<dyn Encoder>) -> Self {
        let ctx = PipelineContext {
            qualities: config.qualities.clone(),
            services,
            encoder,
            admission: AdmissionQueue::new(),
            series: SeriesTracker::new(),
            publish: config.publish.clone(),
        };
        Self {
            ctx: Arc::new(ctx),
            registry: Arc::new(TaskRegistry::new()),
            controllers_token: CancellationToken::new(),
            cancellation_token: CancellationToken::new(),
            accepting: AtomicBool::new(true),
            background: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Start the admitter.
    pub fn start(&self) {
        info!("Starting Pipeline Manager");
        let admission = Arc::clone(&self.ctx.admission);
        let handle = tokio::spawn(admission.run(self.cancellation_token.clone()));
        self.background.lock().push(handle);
        info!(qualities = ?self.ctx.qualities.labels(), "Pipeline Manager started");
    }

    /// Create, register and spawn a controller for one release.
    pub fn submit(&self, submission: Submission) -> Result<PipelineHandle> {
        if !self.accepting.load(Ordering::SeqCst) || self.ctx.admission.is_closed() {
            return Err(Error::QueueClosed);
        }

        let id = Uuid::new_v4().to_string();
        let cancel = self.controllers_token.child_token();

        let item = ReleaseItem::new(
            id.clone(),
            submission.display_name.clone(),
            submission.locator,
            cancel.clone(),
        )
        .forced(submission.forced);

        let (handle, state_tx) =
            ControllerHandle::new(&id, &submission.display_name, cancel.clone());
        self.registry.register(handle)?;

        if let Some(external) = submission.cancel {
            let linked = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = external.cancelled() => linked.cancel(),
                    _ = linked.cancelled() => {}
                }
            });
        }

        let controller = PipelineController::new(Arc::clone(&self.ctx), item, state_tx);
        let registry = Arc::clone(&self.registry);
        let join = tokio::spawn(async move {
            // Cancelling the finished controller's token also ends the
            // external-token forwarder.
            let _done = cancel.drop_guard();
            let report = controller.run().await;
            registry.reap();
            report
        });

        info!(id = %id, item = %submission.display_name, forced = submission.forced, "Submitted");
        Ok(PipelineHandle { id, join })
    }

    pub fn cancel(&self, id: &str) -> bool {
        self.registry.cancel(id)
    }

    pub fn status(&self, id: &str) -> Option<ControllerState> {
        self.registry.state(id)
    }

    pub fn active_count(&self) -> usize {
        self.registry.reap();
        self.registry.len()
    }

    pub fn queued_count(&self) -> usize {
        self.ctx.admission.pending_len()
    }

    pub fn is_encoding(&self) -> bool {
        self.ctx.admission.is_busy()
    }

    /// Run the discovery loop over `sources` if discovery is enabled.
    pub fn spawn_discovery(
        self: &Arc<Self>,
        sources: Vec<Arc<dyn DiscoverySource>>,
        config: &DiscoveryConfig,
    ) -> bool {
        if !config.enabled || sources.is_empty() {
            debug!(enabled = config.enabled, "Discovery not started");
            return false;
        }

        let discovery = DiscoveryLoop::new(sources, config.interval());
        let manager = Arc::clone(self);
        let cancel = self.cancellation_token.clone();
        let handle = tokio::spawn(discovery.run(cancel, move |found| {
            manager
                .submit(Submission::new(found.display_name, found.locator))
                .map(|_| ())
        }));
        self.background.lock().push(handle);
        true
    }

    /// Stop accepting work and let every queued and running item finish.
    pub async fn shutdown(&self) {
        info!("Stopping Pipeline Manager");
        self.accepting.store(false, Ordering::SeqCst);

        self.registry.wait_idle().await;
        self.ctx.admission.close();
        self.ctx.admission.drain().await;

        self.cancellation_token.cancel();
        let handles: Vec<_> = std::mem::take(&mut *self.background.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        self.registry.reap();
        info!("Pipeline Manager stopped");
    }

    /// Cancel every controller, then shut down.
    pub async fn abort(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let cancelled = self.registry.cancel_all();
        self.controllers_token.cancel();
        info!(cancelled, "Aborting all pipelines");
        self.shutdown().await;
    }
}

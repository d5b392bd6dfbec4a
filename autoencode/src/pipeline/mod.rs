//! Encode admission and per-item pipeline.
//!
//! The pipeline is responsible for:
//! - Serializing every encode behind a single FIFO admission queue
//! - Running one controller per discovered release
//! - Encoding, publishing and recording each quality in declared order
//! - Cooperative cancellation and cleanup on every exit path

mod admission;
mod controller;
mod discovery;
mod encoder;
mod manager;
mod progress;
mod publish;
mod registry;
mod series;
pub mod status;

pub use admission::{AdmissionPermit, AdmissionQueue, AdmissionTicket, AdmissionToken};
pub use controller::{
    PipelineContext, PipelineController, PipelineOutcome, PipelineReport, SkipReason,
};
pub use discovery::DiscoveryLoop;
pub use encoder::{EncodeRequest, EncodedArtifact, Encoder, FfmpegEncoder};
pub use manager::{PipelineHandle, PipelineManager, Submission};
pub use progress::{
    ProgressReporter, ProgressSnapshot, ProgressTracker, ProgressUpdate, ScratchState,
    effective_duration, parse_scratch,
};
pub use publish::{LinkBoard, PublishStage, button_label, share_link};
pub use registry::{ControllerHandle, ControllerState, TaskRegistry};
pub use series::{SeriesClaim, SeriesTracker};

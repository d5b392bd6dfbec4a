//! Domain types shared by the pipeline and its collaborators.

pub mod job;
pub mod quality;
pub mod release;

pub use job::{EncodeJobState, JobStage, PublishedLink};
pub use quality::{QualitySet, QualityTarget};
pub use release::{Discovery, ReleaseItem, ReleaseMetadata, fallback_title};

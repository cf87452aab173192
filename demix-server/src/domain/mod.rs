//! Domain types for separation jobs.

pub mod fingerprint;
pub mod job;
pub mod params;
pub mod source;

pub use fingerprint::Fingerprint;
pub use job::{Job, JobStatus};
pub use params::{OutputFormat, ProcessingParams, SeparationModel, Stem, StemSelection};
pub use source::{PlaylistRef, SourceDescriptor, VideoMetadata};

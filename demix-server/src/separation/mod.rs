//! Source separation: running the external tool and packaging its output.

pub mod archive;
pub mod demucs;
mod output;

pub use archive::{ArchiveEntry, build_archive};
pub use demucs::{DemucsConfig, DemucsSeparator};

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::domain::{OutputFormat, SeparationModel};

/// One invocation of the separation tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeparationRequest {
    pub input: PathBuf,
    /// Root the tool writes `<model>/<track>/<stem>.<ext>` under.
    pub output_dir: PathBuf,
    pub model: SeparationModel,
    pub output_format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeparationOutcome {
    /// The tool exited successfully. Artifacts still need to be checked.
    Finished,
    /// The run was stopped because cancellation was requested.
    Cancelled,
}

/// Runs a separation to completion.
///
/// Every line the tool prints is sent on `lines`; the sender is dropped when
/// the run ends. Implementations must stop promptly once `cancel` fires.
#[async_trait]
pub trait Separator: Send + Sync {
    async fn separate(
        &self,
        request: &SeparationRequest,
        lines: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<SeparationOutcome>;
}

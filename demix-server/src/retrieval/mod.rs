//! Retrieval of external audio sources.

pub mod youtube;
pub mod ytdlp;

pub use ytdlp::{YtDlpConfig, YtDlpRetriever};

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::domain::VideoMetadata;

/// One video of a playlist listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistEntry {
    pub video_id: String,
    pub title: Option<String>,
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistListing {
    pub id: String,
    pub title: Option<String>,
    pub entries: Vec<PlaylistEntry>,
}

/// Fetches metadata and audio for external references.
#[async_trait]
pub trait ContentRetriever: Send + Sync {
    /// Metadata for a single video.
    async fn resolve(&self, url: &str) -> Result<VideoMetadata>;

    async fn list_playlist(&self, url: &str) -> Result<PlaylistListing>;

    /// Download the audio of `url` into `target_dir` and return the file path.
    ///
    /// Returns [`crate::Error::Cancelled`] once `cancel` fires.
    async fn download(
        &self,
        url: &str,
        target_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;
}

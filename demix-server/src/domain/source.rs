//! Where a job's audio comes from.

use serde::{Deserialize, Serialize};

/// Metadata resolved for an external video.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub uploader: Option<String>,
    pub duration_secs: u64,
    pub url: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub view_count: Option<u64>,
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub channel_url: Option<String>,
}

/// Position of a video inside the playlist it was submitted from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistRef {
    pub playlist_id: String,
    #[serde(default)]
    pub title: Option<String>,
    /// 1-based.
    pub position: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceDescriptor {
    Upload {
        filename: String,
        sha256: String,
        size_bytes: u64,
    },
    Youtube {
        video_id: String,
        url: String,
        #[serde(default)]
        metadata: Option<VideoMetadata>,
        #[serde(default)]
        playlist: Option<PlaylistRef>,
    },
}

impl SourceDescriptor {
    /// Human readable name for listings and archive names.
    pub fn display_name(&self) -> &str {
        match self {
            Self::Upload { filename, .. } => filename,
            Self::Youtube {
                metadata: Some(meta),
                ..
            } if !meta.title.is_empty() => &meta.title,
            Self::Youtube { video_id, .. } => video_id,
        }
    }

    /// Extension of the file stored in the job's input directory.
    pub fn input_extension(&self) -> String {
        match self {
            Self::Upload { filename, .. } => std::path::Path::new(filename)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .unwrap_or_else(|| "bin".to_string()),
            Self::Youtube { .. } => "mp3".to_string(),
        }
    }

    pub fn is_youtube(&self) -> bool {
        matches!(self, Self::Youtube { .. })
    }

    pub fn metadata(&self) -> Option<&VideoMetadata> {
        match self {
            Self::Youtube { metadata, .. } => metadata.as_ref(),
            Self::Upload { .. } => None,
        }
    }

    pub fn set_metadata(&mut self, meta: VideoMetadata) {
        if let Self::Youtube { metadata, .. } = self {
            *metadata = Some(meta);
        }
    }
}

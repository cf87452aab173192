//! Content fingerprints used as cache keys.
//!
//! Uploads are identified by the SHA-256 of their bytes, external references by
//! the provider's stable id. The two spaces carry distinct tags so an upload can
//! never be mistaken for a video with a coincidentally equal identifier.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Fingerprint {
    /// Hex-encoded SHA-256 of uploaded bytes.
    Upload(String),
    /// YouTube video id.
    Youtube(String),
}

impl Fingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self::Upload(hex::encode(Sha256::digest(bytes)))
    }

    pub fn youtube(video_id: impl Into<String>) -> Self {
        Self::Youtube(video_id.into())
    }

    /// Tagged key, unique across both spaces.
    pub fn key(&self) -> String {
        match self {
            Self::Upload(digest) => format!("sha256:{}", digest),
            Self::Youtube(id) => format!("youtube:{}", id),
        }
    }

    /// Identifier preferred as the job id of the first job for this content.
    pub fn preferred_job_id(&self) -> String {
        match self {
            Self::Upload(digest) => digest.clone(),
            Self::Youtube(id) => format!("yt-{}", id),
        }
    }

    /// The digest or video id without its tag.
    pub fn value(&self) -> &str {
        match self {
            Self::Upload(v) | Self::Youtube(v) => v,
        }
    }

    /// External id under which the record is duplicated, if any.
    pub fn external_id(&self) -> Option<&str> {
        match self {
            Self::Upload(_) => None,
            Self::Youtube(id) => Some(id),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

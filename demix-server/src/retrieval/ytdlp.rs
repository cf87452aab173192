//! yt-dlp backed retriever.

use async_trait::async_trait;
use process_utils::tokio_command;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ContentRetriever, PlaylistEntry, PlaylistListing};
use crate::domain::VideoMetadata;
use crate::jobs::layout::INPUT_STEM;
use crate::utils::fs;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    pub program: String,
    /// Upper bound for any single yt-dlp invocation.
    pub timeout: Duration,
    pub cookies_file: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            timeout: Duration::from_secs(300),
            cookies_file: None,
            extra_args: Vec::new(),
        }
    }
}

impl YtDlpConfig {
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cookies_file(mut self, path: Option<PathBuf>) -> Self {
        self.cookies_file = path;
        self
    }
}

/// Subset of yt-dlp's info JSON.
#[derive(Debug, Deserialize)]
struct InfoJson {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    upload_date: Option<String>,
    #[serde(default)]
    view_count: Option<u64>,
    #[serde(default)]
    like_count: Option<u64>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    channel_url: Option<String>,
    #[serde(default)]
    is_live: Option<bool>,
    #[serde(default)]
    entries: Option<Vec<Option<FlatEntry>>>,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

impl InfoJson {
    fn into_metadata(self) -> Result<VideoMetadata> {
        if self.is_live == Some(true) {
            return Err(Error::Retrieval("live streams are not supported".to_string()));
        }
        let duration = self.duration.ok_or_else(|| {
            Error::Retrieval(format!("could not determine the duration of video {}", self.id))
        })?;
        Ok(VideoMetadata {
            url: self
                .webpage_url
                .unwrap_or_else(|| super::youtube::watch_url(&self.id)),
            title: self.title.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            uploader: self.uploader,
            duration_secs: duration.max(0.0).round() as u64,
            thumbnail: self.thumbnail,
            description: self.description,
            upload_date: self.upload_date,
            view_count: self.view_count,
            like_count: self.like_count,
            channel: self.channel,
            channel_url: self.channel_url,
        })
    }

    fn into_listing(self) -> PlaylistListing {
        let entries = self
            .entries
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .filter_map(|entry| {
                let video_id = entry.id?;
                Some(PlaylistEntry {
                    video_id,
                    title: entry.title,
                    duration_secs: entry.duration.map(|d| d.max(0.0).round() as u64),
                })
            })
            .collect();
        PlaylistListing {
            id: self.id,
            title: self.title,
            entries,
        }
    }
}

/// Reduce yt-dlp's stderr to the message worth showing a user.
fn error_message(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let line = text
        .lines()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| text.lines().rev().find(|l| !l.trim().is_empty()))
        .unwrap_or("yt-dlp failed without output");
    let message = line.trim_start_matches("ERROR:").trim();
    // yt-dlp prefixes errors with "[youtube] <id>: ".
    match message.split_once("]") {
        Some((prefix, rest)) if prefix.starts_with('[') => rest
            .split_once(": ")
            .map(|(_, m)| m)
            .unwrap_or(rest)
            .trim()
            .to_string(),
        _ => message.to_string(),
    }
}

pub struct YtDlpRetriever {
    config: YtDlpConfig,
}

impl YtDlpRetriever {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    fn command(&self, args: &[&str]) -> tokio::process::Command {
        let mut cmd = tokio_command(&self.config.program);
        cmd.arg("--no-warnings");
        if let Some(cookies) = &self.config.cookies_file {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd.args(&self.config.extra_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, args: &[&str], cancel: Option<&CancellationToken>) -> Result<Output> {
        let mut cmd = self.command(args);
        debug!(program = %self.config.program, args = ?args, "Running yt-dlp");

        let run = tokio::time::timeout(self.config.timeout, cmd.output());
        let result = match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => return Err(Error::Cancelled),
                result = run => result,
            },
            None => run.await,
        };

        let output = result
            .map_err(|_| {
                Error::Retrieval(format!(
                    "yt-dlp timed out after {} seconds",
                    self.config.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                Error::Retrieval(format!("failed to run {}: {}", self.config.program, e))
            })?;

        if !output.status.success() {
            return Err(Error::Retrieval(error_message(&output.stderr)));
        }
        Ok(output)
    }

    async fn info_json(&self, args: &[&str]) -> Result<InfoJson> {
        let output = self.run(args, None).await?;
        serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::Retrieval(format!("unexpected yt-dlp output: {}", e)))
    }
}

#[async_trait]
impl ContentRetriever for YtDlpRetriever {
    async fn resolve(&self, url: &str) -> Result<VideoMetadata> {
        let info = self
            .info_json(&["--dump-single-json", "--no-download", "--no-playlist", url])
            .await?;
        info.into_metadata()
    }

    async fn list_playlist(&self, url: &str) -> Result<PlaylistListing> {
        let info = self
            .info_json(&["--flat-playlist", "--dump-single-json", url])
            .await?;
        let listing = info.into_listing();
        if listing.entries.is_empty() {
            return Err(Error::Retrieval("playlist has no playable videos".to_string()));
        }
        Ok(listing)
    }

    async fn download(
        &self,
        url: &str,
        target_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        fs::ensure_dir_all_with_op("creating download directory", target_dir).await?;
        let template = target_dir.join(format!("{}.%(ext)s", INPUT_STEM));
        let template = template.to_string_lossy();

        self.run(
            &[
                "--extract-audio",
                "--audio-format",
                "mp3",
                "--audio-quality",
                "0",
                "--no-playlist",
                "--output",
                &template,
                url,
            ],
            Some(cancel),
        )
        .await?;

        let expected = target_dir.join(format!("{}.mp3", INPUT_STEM));
        if fs::is_non_empty_file(&expected).await {
            info!(path = %expected.display(), "Downloaded source audio");
            return Ok(expected);
        }
        Err(Error::Retrieval(
            "download finished but no audio file was produced".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_from_info_json() {
        let info: InfoJson = serde_json::from_str(
            r#"{"id":"dQw4w9WgXcQ","title":"Never Gonna Give You Up","uploader":"Rick Astley",
                "duration":212.6,"webpage_url":"https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                "view_count":1000,"formats":[{"format_id":"18"}]}"#,
        )
        .unwrap();
        let meta = info.into_metadata().unwrap();
        assert_eq!(meta.duration_secs, 213);
        assert_eq!(meta.title, "Never Gonna Give You Up");
        assert_eq!(meta.uploader.as_deref(), Some("Rick Astley"));
    }

    #[test]
    fn test_live_or_durationless_videos_are_rejected() {
        let live: InfoJson = serde_json::from_str(r#"{"id":"x","is_live":true}"#).unwrap();
        assert!(live.into_metadata().is_err());
        let unknown: InfoJson = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert!(unknown.into_metadata().is_err());
    }

    #[test]
    fn test_flat_playlist_listing_skips_unavailable_entries() {
        let info: InfoJson = serde_json::from_str(
            r#"{"id":"PL1","title":"Mix","entries":[
                {"id":"aaaaaaaaaaa","title":"One","duration":100},
                null,
                {"title":"[Private video]"},
                {"id":"bbbbbbbbbbb"}]}"#,
        )
        .unwrap();
        let listing = info.into_listing();
        assert_eq!(listing.id, "PL1");
        assert_eq!(listing.entries.len(), 2);
        assert_eq!(listing.entries[0].duration_secs, Some(100));
        assert_eq!(listing.entries[1].title, None);
    }

    #[test]
    fn test_error_message_is_trimmed() {
        let stderr = b"WARNING: something\nERROR: [youtube] abc123: Video unavailable\n";
        assert_eq!(error_message(stderr), "Video unavailable");
        assert_eq!(error_message(b"boom\n"), "boom");
        assert_eq!(error_message(b""), "yt-dlp failed without output");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow-ytdlp");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let retriever = YtDlpRetriever::new(
            YtDlpConfig::default()
                .with_program(script.to_string_lossy())
                .with_timeout(Duration::from_millis(300)),
        );
        let err = retriever.resolve("https://youtu.be/dQw4w9WgXcQ").await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
    }
}

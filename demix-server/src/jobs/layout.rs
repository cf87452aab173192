//! On-disk layout of job inputs and outputs.
//!
//! ```text
//! <root>/<job_id>/input/source.<ext>
//! <root>/<job_id>/output/<model>/source/<stem>.<ext>
//! <root>/<job_id>/archives/stems_<job_id>_<stems>.zip
//! ```
//!
//! Each job owns its directory, so concurrent cleanup and execution never
//! touch the same files.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::{Job, Stem, StemSelection};
use crate::utils::fs;
use crate::{Error, Result};

/// Base name of the input file; demucs names its track directory after it.
pub const INPUT_STEM: &str = "source";

#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    pub fn input_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("input")
    }

    pub fn output_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("output")
    }

    pub fn input_path(&self, job: &Job) -> PathBuf {
        self.input_dir(&job.id)
            .join(format!("{}.{}", INPUT_STEM, job.source.input_extension()))
    }

    /// Directory demucs writes the stems of this job into.
    pub fn track_dir(&self, job: &Job) -> PathBuf {
        self.output_dir(&job.id)
            .join(job.params.model.as_str())
            .join(INPUT_STEM)
    }

    pub fn stem_path(&self, job: &Job, stem: Stem) -> PathBuf {
        self.track_dir(job).join(format!(
            "{}.{}",
            stem.as_str(),
            job.params.output_format.extension()
        ))
    }

    /// Every file a successful run must leave behind.
    pub fn expected_artifacts(&self, job: &Job) -> Vec<PathBuf> {
        job.params
            .model
            .stems()
            .iter()
            .map(|stem| self.stem_path(job, *stem))
            .collect()
    }

    /// File names of expected artifacts that are not on disk.
    pub async fn missing_artifacts(&self, job: &Job) -> Vec<String> {
        let mut missing = Vec::new();
        for path in self.expected_artifacts(job) {
            if !fs::is_non_empty_file(&path).await {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                missing.push(name);
            }
        }
        missing
    }

    pub async fn artifacts_present(&self, job: &Job) -> bool {
        self.missing_artifacts(job).await.is_empty()
    }

    /// Stems of this job currently on disk, in display order.
    pub async fn available_stems(&self, job: &Job) -> Vec<Stem> {
        let mut stems = Vec::new();
        for stem in job.params.model.stems() {
            if fs::is_non_empty_file(&self.stem_path(job, *stem)).await {
                stems.push(*stem);
            }
        }
        stems.sort();
        stems
    }

    pub fn archive_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("archives")
    }

    /// One archive per stem selection, so differing requests never share a file.
    pub fn archive_path(&self, job_id: &str, stems: StemSelection) -> PathBuf {
        self.archive_dir(job_id)
            .join(format!("stems_{}_{}.zip", job_id, stems))
    }

    pub async fn prepare_archive_dir(&self, job_id: &str) -> Result<PathBuf> {
        let dir = self.archive_dir(job_id);
        fs::ensure_dir_all_with_op("creating archive directory", &dir).await?;
        Ok(dir)
    }

    pub async fn prepare_input_dir(&self, job_id: &str) -> Result<PathBuf> {
        let dir = self.input_dir(job_id);
        fs::ensure_dir_all_with_op("creating input directory", &dir).await?;
        Ok(dir)
    }

    pub async fn write_input(&self, job: &Job, bytes: &[u8]) -> Result<PathBuf> {
        self.prepare_input_dir(&job.id).await?;
        let path = self.input_path(job);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::io_path("writing", &path, e))?;
        Ok(path)
    }

    /// Remove partial or stale separation output.
    pub async fn clear_output(&self, job_id: &str) -> Result<()> {
        fs::remove_dir_all_if_exists(&self.output_dir(job_id)).await?;
        fs::remove_dir_all_if_exists(&self.archive_dir(job_id)).await?;
        debug!(job_id = %job_id, "Cleared job output");
        Ok(())
    }

    pub async fn remove_job_dir(&self, job_id: &str) -> Result<()> {
        fs::remove_dir_all_if_exists(&self.job_dir(job_id)).await
    }
}

//! Demucs command-line separator.

use async_trait::async_trait;
use process_utils::{terminate_gracefully, tokio_command};
use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::output::forward_lines;
use super::{SeparationOutcome, SeparationRequest, Separator};
use crate::domain::OutputFormat;
use crate::utils::fs;
use crate::{Error, Result};

/// How long to wait for the output readers after the child is gone.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DemucsConfig {
    /// Executable to run, `python3` by default.
    pub program: String,
    /// Arguments placed before the demucs options, `-m demucs` by default.
    pub base_args: Vec<String>,
    /// Value for `-d` (e.g. `cpu`, `cuda`); demucs picks one when unset.
    pub device: Option<String>,
    /// Value for `-j`.
    pub jobs: Option<u32>,
    /// Time between SIGTERM and SIGKILL on cancellation.
    pub termination_grace: Duration,
}

impl Default for DemucsConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            base_args: vec!["-m".to_string(), "demucs".to_string()],
            device: None,
            jobs: None,
            termination_grace: Duration::from_secs(5),
        }
    }
}

impl DemucsConfig {
    pub fn with_program(mut self, program: impl Into<String>, base_args: Vec<String>) -> Self {
        self.program = program.into();
        self.base_args = base_args;
        self
    }

    pub fn with_device(mut self, device: Option<String>) -> Self {
        self.device = device;
        self
    }

    pub fn with_jobs(mut self, jobs: Option<u32>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }
}

pub struct DemucsSeparator {
    config: DemucsConfig,
}

impl DemucsSeparator {
    pub fn new(config: DemucsConfig) -> Self {
        Self { config }
    }

    /// Arguments after the program name.
    pub fn build_args(&self, request: &SeparationRequest) -> Vec<String> {
        let mut args = self.config.base_args.clone();
        args.extend([
            "-n".to_string(),
            request.model.as_str().to_string(),
            "--out".to_string(),
            request.output_dir.to_string_lossy().into_owned(),
        ]);
        if request.output_format == OutputFormat::Mp3 {
            args.push("--mp3".to_string());
        }
        if let Some(device) = &self.config.device {
            args.extend(["-d".to_string(), device.clone()]);
        }
        if let Some(jobs) = self.config.jobs {
            args.extend(["-j".to_string(), jobs.to_string()]);
        }
        args.push(request.input.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl Separator for DemucsSeparator {
    async fn separate(
        &self,
        request: &SeparationRequest,
        lines: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<SeparationOutcome> {
        fs::ensure_dir_all_with_op("creating output directory", &request.output_dir).await?;

        let args = self.build_args(request);
        debug!(program = %self.config.program, args = ?args, "Starting demucs");

        let mut child = tokio_command(&self.config.program)
            .args(&args)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Separation(format!("failed to start {}: {}", self.config.program, e))
            })?;

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(forward_lines(out, lines.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(forward_lines(err, lines.clone())));
        drop(lines);

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| Error::Separation(format!("failed to wait for demucs: {}", e)))?,
            _ = cancel.cancelled() => {
                info!(input = %request.input.display(), "Stopping demucs");
                if let Err(e) = terminate_gracefully(&mut child, self.config.termination_grace).await {
                    warn!(error = %e, "Failed to terminate demucs");
                }
                drain(stdout_task).await;
                drain(stderr_task).await;
                return Ok(SeparationOutcome::Cancelled);
            }
        };

        drain(stdout_task).await;
        let stderr_tail = drain(stderr_task).await;

        if !status.success() {
            let detail = stderr_tail
                .iter()
                .rev()
                .find(|line| !line.contains("%|"))
                .cloned()
                .unwrap_or_else(|| "no output".to_string());
            return Err(Error::Separation(format!(
                "demucs exited with {}: {}",
                status, detail
            )));
        }

        Ok(SeparationOutcome::Finished)
    }
}

async fn drain(task: Option<JoinHandle<VecDeque<String>>>) -> VecDeque<String> {
    let Some(mut task) = task else {
        return VecDeque::new();
    };
    match tokio::time::timeout(READER_DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(tail)) => tail,
        Ok(Err(e)) => {
            warn!(error = %e, "Output reader task failed");
            VecDeque::new()
        }
        Err(_) => {
            // A grandchild still holds the pipe open.
            task.abort();
            VecDeque::new()
        }
    }
}

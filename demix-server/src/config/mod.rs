//! Process configuration read from the environment.
//!
//! `main` loads a `.env` file with dotenvy first; every variable has a
//! default so an empty environment yields a working local setup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::api::server::ApiServerConfig;
use crate::intake::{DEFAULT_MAX_UPLOAD_BYTES, IntakeConfig};
use crate::jobs::{CoordinatorConfig, RetentionConfig, ServiceConfig};
use crate::retrieval::YtDlpConfig;
use crate::separation::DemucsConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_address: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub database_url: String,
    pub log_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub max_source_duration_secs: u64,
    pub job_retention_hours: u32,
    pub cleanup_interval_secs: u64,
    pub download_cleanup_delay_secs: u64,
    pub poll_interval_ms: u64,
    pub termination_grace_secs: u64,
    pub demucs_program: String,
    pub demucs_args: Vec<String>,
    pub demucs_device: Option<String>,
    pub demucs_jobs: Option<u32>,
    pub ytdlp_program: String,
    pub ytdlp_timeout_secs: u64,
    pub ytdlp_cookies_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Blank or unparsable values
    /// fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let parsed = |key: &str, default| parse_or(var(key), default);

        let data_dir = PathBuf::from(var("DATA_DIR").unwrap_or_else(|| "./data".to_string()));
        let database_url = var("DATABASE_URL").unwrap_or_else(|| {
            format!("sqlite:{}?mode=rwc", data_dir.join("demix.db").display())
        });

        Self {
            bind_address: var("API_BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(var("SERVER_PORT"), 8080),
            database_url,
            data_dir,
            log_dir: PathBuf::from(var("LOG_DIR").unwrap_or_else(|| "./logs".to_string())),
            max_upload_bytes: parsed("MAX_UPLOAD_SIZE", DEFAULT_MAX_UPLOAD_BYTES),
            max_source_duration_secs: parsed("MAX_SOURCE_DURATION_SECS", 600),
            job_retention_hours: parse_or(var("JOB_RETENTION_HOURS"), 1),
            cleanup_interval_secs: parsed("CLEANUP_INTERVAL_SECS", 900),
            download_cleanup_delay_secs: parsed("DOWNLOAD_CLEANUP_DELAY_SECS", 300),
            poll_interval_ms: parsed("POLL_INTERVAL_MS", 500),
            termination_grace_secs: parsed("TERMINATION_GRACE_SECS", 5),
            demucs_program: var("DEMUCS_PROGRAM").unwrap_or_else(|| "python3".to_string()),
            demucs_args: var("DEMUCS_ARGS")
                .unwrap_or_else(|| "-m demucs".to_string())
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            demucs_device: var("DEMUCS_DEVICE"),
            demucs_jobs: var("DEMUCS_JOBS").and_then(|v| v.parse().ok()),
            ytdlp_program: var("YTDLP_PROGRAM").unwrap_or_else(|| "yt-dlp".to_string()),
            ytdlp_timeout_secs: parsed("YTDLP_TIMEOUT_SECS", 300),
            ytdlp_cookies_file: var("YTDLP_COOKIES_FILE").map(PathBuf::from),
        }
    }

    /// Root of the per-job directory tree.
    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    pub fn api_server_config(&self) -> ApiServerConfig {
        ApiServerConfig {
            bind_address: self.bind_address.clone(),
            port: self.port,
            // Multipart framing on top of the largest accepted file.
            body_limit: self.max_upload_bytes as usize + 1024 * 1024,
            ..ApiServerConfig::default()
        }
    }

    pub fn intake_config(&self) -> IntakeConfig {
        IntakeConfig::default().with_max_bytes(self.max_upload_bytes)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::default()
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms.max(1)))
            .with_max_source_duration_secs(self.max_source_duration_secs)
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig::default()
            .with_max_source_duration_secs(self.max_source_duration_secs)
            .with_download_cleanup_delay(Duration::from_secs(self.download_cleanup_delay_secs))
    }

    pub fn retention_config(&self) -> RetentionConfig {
        RetentionConfig::new()
            .with_retention_hours(self.job_retention_hours)
            .with_check_interval_secs(self.cleanup_interval_secs)
    }

    pub fn demucs_config(&self) -> DemucsConfig {
        DemucsConfig::default()
            .with_program(self.demucs_program.clone(), self.demucs_args.clone())
            .with_device(self.demucs_device.clone())
            .with_jobs(self.demucs_jobs)
            .with_termination_grace(Duration::from_secs(self.termination_grace_secs))
    }

    pub fn ytdlp_config(&self) -> YtDlpConfig {
        YtDlpConfig::default()
            .with_program(self.ytdlp_program.clone())
            .with_timeout(Duration::from_secs(self.ytdlp_timeout_secs))
            .with_cookies_file(self.ytdlp_cookies_file.clone())
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

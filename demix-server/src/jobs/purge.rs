//! Retention sweeper for finished jobs.
//!
//! Runs in the background and removes terminal jobs, together with their
//! files and durable records, once they have outlived the retention period.

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::service::JobService;
use crate::Result;

/// Configuration for job retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Hours a finished job is kept. 0 keeps jobs indefinitely.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,

    /// Interval between sweeps in seconds.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

fn default_retention_hours() -> u32 {
    1
}

fn default_check_interval_secs() -> u64 {
    900 // 15 minutes
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl RetentionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention_hours(mut self, hours: u32) -> Self {
        self.retention_hours = hours;
        self
    }

    pub fn with_check_interval_secs(mut self, secs: u64) -> Self {
        self.check_interval_secs = secs;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.retention_hours > 0
    }

    /// Age past which a finished job is removed.
    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.retention_hours))
    }

    fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }
}

pub struct RetentionSweeper {
    config: RetentionConfig,
    service: JobService,
}

impl RetentionSweeper {
    pub fn new(config: RetentionConfig, service: JobService) -> Self {
        Self { config, service }
    }

    /// Run a single sweep. Returns the number of jobs removed.
    pub async fn run_sweep(&self) -> Result<usize> {
        if !self.config.is_enabled() {
            debug!("Job retention disabled (retention_hours = 0)");
            return Ok(0);
        }

        let removed = self.service.sweep_expired(self.config.max_age()).await?;
        if removed > 0 {
            info!(
                removed,
                retention_hours = self.config.retention_hours,
                "Removed expired jobs"
            );
        } else {
            debug!("No expired jobs");
        }
        Ok(removed)
    }

    /// Start the background sweep task. The first sweep runs after one interval.
    pub fn start_background_task(self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.check_interval();
            let mut check_interval = interval_at(Instant::now() + period, period);

            info!(
                retention_hours = self.config.retention_hours,
                interval_secs = period.as_secs(),
                "Retention sweeper started"
            );

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Retention sweeper shutting down");
                        break;
                    }
                    _ = check_interval.tick() => {
                        if let Err(e) = self.run_sweep().await {
                            error!(error = %e, "Retention sweep failed");
                        }
                    }
                }
            }
        })
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_config_default() {
        let config = RetentionConfig::default();
        assert_eq!(config.retention_hours, 1);
        assert_eq!(config.check_interval_secs, 900);
        assert!(config.is_enabled());
        assert_eq!(config.max_age(), chrono::Duration::hours(1));
    }

    #[test]
    fn test_retention_config_builder() {
        let config = RetentionConfig::new()
            .with_retention_hours(24)
            .with_check_interval_secs(60);
        assert_eq!(config.retention_hours, 24);
        assert_eq!(config.check_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_hours_disables_retention() {
        let config = RetentionConfig::new().with_retention_hours(0);
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let config = RetentionConfig::new().with_check_interval_secs(0);
        assert_eq!(config.check_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: RetentionConfig = serde_json::from_str(r#"{"retention_hours": 6}"#).unwrap();
        assert_eq!(config.retention_hours, 6);
        assert_eq!(config.check_interval_secs, 900);
    }
}

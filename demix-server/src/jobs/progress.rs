//! Progress interpretation for the separation tool's console output.
//!
//! Demucs reports progress through tqdm bars (`" 45%|████▌   | 52.6/117.0 [...]"`)
//! plus a few free-text status lines. A bag-of-models run draws one bar per
//! model, so raw percentages restart from zero several times per track.

use regex::Regex;
use std::sync::LazyLock;

/// Coarse phase of a run, reported alongside the percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ProgressStage {
    Retrieving,
    Loading,
    Separating,
    Saving,
    Finalizing,
}

impl ProgressStage {
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Retrieving => "Downloading source audio",
            Self::Loading => "Loading model",
            Self::Separating => "Separating stems",
            Self::Saving => "Saving stems",
            Self::Finalizing => "Verifying output",
        }
    }
}

/// What one line of output said.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProgressUpdate {
    pub stage: Option<ProgressStage>,
    /// Raw 0-100 percentage of the current progress bar.
    pub percent: Option<f32>,
    /// Number of progress bars the tool announced for one track.
    pub passes: Option<u32>,
}

/// Turns one line of tool output into a progress update.
///
/// Returns `None` for lines that carry no progress information.
pub trait ProgressParser: Send + Sync {
    fn parse(&self, line: &str) -> Option<ProgressUpdate>;
}

static PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,3}(?:\.\d+)?)%\|").expect("valid regex")
});

static BAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)bag of (\d+) models").expect("valid regex")
});

/// Parser for demucs console output.
#[derive(Debug, Default, Clone, Copy)]
pub struct DemucsProgressParser;

impl ProgressParser for DemucsProgressParser {
    fn parse(&self, line: &str) -> Option<ProgressUpdate> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if let Some(caps) = PERCENT_RE.captures(line) {
            let percent = caps[1].parse::<f32>().ok()?.clamp(0.0, 100.0);
            return Some(ProgressUpdate {
                stage: Some(ProgressStage::Separating),
                percent: Some(percent),
                passes: None,
            });
        }

        let passes = BAG_RE
            .captures(line)
            .and_then(|caps| caps[1].parse::<u32>().ok())
            .filter(|n| *n > 0);

        let lower = line.to_lowercase();
        let stage = if lower.contains("saving") || lower.contains("writing") {
            Some(ProgressStage::Saving)
        } else if lower.contains("separating") || lower.contains("processing") {
            Some(ProgressStage::Separating)
        } else if lower.contains("loading") || lower.contains("model") {
            Some(ProgressStage::Loading)
        } else {
            None
        };

        if stage.is_none() && passes.is_none() {
            return None;
        }
        Some(ProgressUpdate {
            stage,
            percent: None,
            passes,
        })
    }
}

/// Slice of the 0-100 scale a phase of work reports into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressBand {
    pub start: u8,
    pub end: u8,
}

impl ProgressBand {
    /// The separation tool itself.
    pub const TRANSFORM: Self = Self { start: 10, end: 95 };
    /// Artifact verification and bookkeeping.
    pub const FINALIZE: Self = Self { start: 95, end: 100 };

    pub fn map(&self, raw_percent: f32) -> u8 {
        let raw = raw_percent.clamp(0.0, 100.0);
        let span = f32::from(self.end.saturating_sub(self.start));
        (f32::from(self.start) + span * raw / 100.0).floor() as u8
    }
}

/// Per-run state that folds repeated progress bars into one overall figure.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    band: ProgressBand,
    passes: u32,
    completed_passes: u32,
    last_raw: f32,
}

/// Drop in raw percentage that marks the start of a new progress bar.
const PASS_RESET_THRESHOLD: f32 = 50.0;

impl ProgressTracker {
    pub fn new(band: ProgressBand) -> Self {
        Self {
            band,
            passes: 1,
            completed_passes: 0,
            last_raw: 0.0,
        }
    }

    /// Fold an update in and return the overall percentage it implies, if any.
    pub fn observe(&mut self, update: &ProgressUpdate) -> Option<u8> {
        if let Some(passes) = update.passes {
            self.passes = passes.max(1);
        }

        if let Some(raw) = update.percent {
            if raw + PASS_RESET_THRESHOLD < self.last_raw {
                self.completed_passes = (self.completed_passes + 1).min(self.passes - 1);
            }
            self.last_raw = raw;
            let overall =
                (self.completed_passes as f32 * 100.0 + raw) / self.passes as f32;
            return Some(self.band.map(overall));
        }

        match update.stage {
            Some(ProgressStage::Loading) => Some(self.band.start),
            Some(ProgressStage::Saving) => Some(self.band.end),
            _ => None,
        }
    }
}

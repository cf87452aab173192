//! Processing parameters: which model runs, how stems are encoded and which
//! stems end up in the download.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::IntoEnumIterator;

use crate::{Error, Result};

/// A single separated source.
///
/// Declaration order is the display order used when listing stems.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Stem {
    Vocals,
    Bass,
    Drums,
    Guitar,
    Piano,
    Other,
}

impl Stem {
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }
}

const FOUR_STEMS: &[Stem] = &[Stem::Vocals, Stem::Bass, Stem::Drums, Stem::Other];
const SIX_STEMS: &[Stem] = &[
    Stem::Vocals,
    Stem::Bass,
    Stem::Drums,
    Stem::Guitar,
    Stem::Piano,
    Stem::Other,
];

/// Separation model passed to demucs with `-n`.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
pub enum SeparationModel {
    #[serde(rename = "htdemucs")]
    #[strum(serialize = "htdemucs")]
    Htdemucs,
    #[default]
    #[serde(rename = "htdemucs_ft")]
    #[strum(serialize = "htdemucs_ft")]
    HtdemucsFt,
    #[serde(rename = "htdemucs_6s")]
    #[strum(serialize = "htdemucs_6s")]
    Htdemucs6s,
    #[serde(rename = "mdx_extra")]
    #[strum(serialize = "mdx_extra")]
    MdxExtra,
}

impl SeparationModel {
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }

    /// Stems this model always writes.
    pub fn stems(&self) -> &'static [Stem] {
        match self {
            Self::Htdemucs6s => SIX_STEMS,
            _ => FOUR_STEMS,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Htdemucs => "Standard quality, 4 stems",
            Self::HtdemucsFt => "High quality (fine-tuned), 4 stems",
            Self::Htdemucs6s => "High quality, 6 stems",
            Self::MdxExtra => "Fast processing, 4 stems",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::from_str(s.trim()).map_err(|_| {
            Error::validation(format!(
                "Invalid model '{}'. Choose from: {}",
                s,
                Self::iter().map(|m| m.to_string()).collect::<Vec<_>>().join(", ")
            ))
        })
    }
}

/// Encoding of the separated stems.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp3,
    Wav,
}

impl OutputFormat {
    /// File extension of the stems demucs writes for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Wav => "audio/wav",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::from_str(&s.trim().to_ascii_lowercase()).map_err(|_| {
            Error::validation(format!("Invalid output format '{}'. Choose from: mp3, wav", s))
        })
    }
}

/// Which stems the requester wants to download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StemSelection {
    #[default]
    All,
    Only(Stem),
}

impl StemSelection {
    pub fn parse(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        if normalized == "all" {
            return Ok(Self::All);
        }
        Stem::from_str(&normalized)
            .map(Self::Only)
            .map_err(|_| {
                Error::validation(format!(
                    "Invalid stems '{}'. Choose from: all, vocals, bass, drums, guitar, piano, other",
                    s
                ))
            })
    }

    pub fn includes(&self, stem: Stem) -> bool {
        match self {
            Self::All => true,
            Self::Only(selected) => *selected == stem,
        }
    }
}

impl fmt::Display for StemSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Only(stem) => write!(f, "{}", stem),
        }
    }
}

impl TryFrom<String> for StemSelection {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<StemSelection> for String {
    fn from(value: StemSelection) -> Self {
        value.to_string()
    }
}

/// Parameters that shape one separation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessingParams {
    pub model: SeparationModel,
    pub output_format: OutputFormat,
    #[serde(default)]
    pub stems: StemSelection,
}

impl ProcessingParams {
    pub fn new(model: SeparationModel, output_format: OutputFormat, stems: StemSelection) -> Self {
        Self {
            model,
            output_format,
            stems,
        }
    }

    /// Build parameters from optional request fields, applying defaults.
    pub fn from_request(
        model: Option<&str>,
        output_format: Option<&str>,
        stems: Option<&str>,
    ) -> Result<Self> {
        let params = Self {
            model: model
                .filter(|s| !s.trim().is_empty())
                .map(SeparationModel::parse)
                .transpose()?
                .unwrap_or_default(),
            output_format: output_format
                .filter(|s| !s.trim().is_empty())
                .map(OutputFormat::parse)
                .transpose()?
                .unwrap_or_default(),
            stems: stems
                .filter(|s| !s.trim().is_empty())
                .map(StemSelection::parse)
                .transpose()?
                .unwrap_or_default(),
        };
        params.validate()?;
        Ok(params)
    }

    /// A single requested stem must be one the model produces.
    pub fn validate(&self) -> Result<()> {
        if let StemSelection::Only(stem) = self.stems
            && !self.model.stems().contains(&stem)
        {
            return Err(Error::validation(format!(
                "Model {} does not produce a {} stem",
                self.model, stem
            )));
        }
        Ok(())
    }

    /// Whether a completed run with `other` parameters can serve this request.
    ///
    /// Stem selection is applied at packaging time, so only the model and the
    /// output encoding matter.
    pub fn cache_compatible(&self, other: &ProcessingParams) -> bool {
        self.model == other.model && self.output_format == other.output_format
    }

    /// Stems that go into the download for these parameters.
    pub fn selected_stems(&self) -> Vec<Stem> {
        self.model
            .stems()
            .iter()
            .copied()
            .filter(|stem| self.stems.includes(*stem))
            .collect()
    }
}

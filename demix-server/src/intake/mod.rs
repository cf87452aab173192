//! Validation of uploaded audio before a job is admitted.

use crate::{Error, Result};

/// Extensions accepted for uploads.
pub const ALLOWED_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "m4a", "ogg", "opus"];

/// Default upload limit, 100 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Decides whether uploaded bytes may become a job.
///
/// A rejection is an [`Error::Validation`] carrying the reason, or
/// [`Error::PayloadTooLarge`] for oversized uploads.
pub trait IntakeValidator: Send + Sync {
    fn validate(&self, filename: &str, bytes: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub max_bytes: u64,
    pub allowed_extensions: Vec<String>,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_extensions: ALLOWED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl IntakeConfig {
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

/// Container families recognised by their leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioContainer {
    Mp3,
    Wav,
    Flac,
    Mp4,
    Ogg,
}

/// Identify an audio container from its first bytes.
pub fn sniff_container(bytes: &[u8]) -> Option<AudioContainer> {
    if bytes.starts_with(b"ID3") {
        return Some(AudioContainer::Mp3);
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        return Some(AudioContainer::Wav);
    }
    if bytes.starts_with(b"fLaC") {
        return Some(AudioContainer::Flac);
    }
    if bytes.starts_with(b"OggS") {
        return Some(AudioContainer::Ogg);
    }
    if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
        return Some(AudioContainer::Mp4);
    }
    // Bare MPEG audio frame sync: 11 set bits, layer bits not reserved.
    if bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0 && (bytes[1] & 0x06) != 0
    {
        return Some(AudioContainer::Mp3);
    }
    None
}

/// Size, extension and content-signature checks for uploads.
#[derive(Debug, Clone, Default)]
pub struct AudioIntakeValidator {
    config: IntakeConfig,
}

impl AudioIntakeValidator {
    pub fn new(config: IntakeConfig) -> Self {
        Self { config }
    }

    pub fn max_bytes(&self) -> u64 {
        self.config.max_bytes
    }
}

impl IntakeValidator for AudioIntakeValidator {
    fn validate(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Err(Error::validation("Uploaded file is empty"));
        }
        if bytes.len() as u64 > self.config.max_bytes {
            return Err(Error::PayloadTooLarge {
                max_bytes: self.config.max_bytes,
            });
        }

        let extension = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match extension {
            Some(ext) if self.config.allowed_extensions.iter().any(|a| *a == ext) => {}
            _ => {
                return Err(Error::validation(format!(
                    "Invalid file format. Supported: {}",
                    self.config.allowed_extensions.join(", ")
                )));
            }
        }

        if sniff_container(bytes).is_none() {
            return Err(Error::validation(
                "File content is not a recognised audio format",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(b"ID3\x04\x00\x00\x00\x00\x00\x00".as_slice(), Some(AudioContainer::Mp3))]
    #[case(b"\xFF\xFB\x90\x64".as_slice(), Some(AudioContainer::Mp3))]
    #[case(b"RIFF\x24\x08\x00\x00WAVEfmt ".as_slice(), Some(AudioContainer::Wav))]
    #[case(b"fLaC\x00\x00\x00\x22".as_slice(), Some(AudioContainer::Flac))]
    #[case(b"OggS\x00\x02".as_slice(), Some(AudioContainer::Ogg))]
    #[case(b"\x00\x00\x00\x20ftypM4A ".as_slice(), Some(AudioContainer::Mp4))]
    #[case(b"%PDF-1.7".as_slice(), None)]
    #[case(b"RIFF\x24\x08\x00\x00AVI ".as_slice(), None)]
    fn test_sniff(#[case] bytes: &[u8], #[case] expected: Option<AudioContainer>) {
        assert_eq!(sniff_container(bytes), expected);
    }

    #[test]
    fn test_rejections_carry_reasons() {
        let validator = AudioIntakeValidator::new(IntakeConfig::default().with_max_bytes(16));

        let empty = validator.validate("a.mp3", b"").unwrap_err().to_string();
        assert!(empty.contains("empty"));

        let big = validator.validate("a.mp3", &[0u8; 17]).unwrap_err();
        assert!(matches!(big, Error::PayloadTooLarge { max_bytes: 16 }));
        assert!(big.to_string().starts_with("File too large"));

        let ext = validator.validate("a.exe", b"ID3abc").unwrap_err().to_string();
        assert!(ext.contains("Supported"));

        let content = validator.validate("a.mp3", b"hello world").unwrap_err().to_string();
        assert!(content.contains("not a recognised audio format"));
    }

    #[test]
    fn test_accepts_uppercase_extension() {
        let validator = AudioIntakeValidator::default();
        validator.validate("Song.FLAC", b"fLaC\x00\x00\x00\x22").unwrap();
    }
}

//! Filename sanitization for names derived from user input.

const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Maximum length in characters of a sanitized name.
const MAX_NAME_CHARS: usize = 120;

/// Make `input` safe to use as a file name on every platform.
///
/// Control and reserved characters collapse into a single `_`, leading and
/// trailing dots and spaces are trimmed, and an empty result becomes
/// `"unnamed"`.
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars().take(MAX_NAME_CHARS) {
        if c.is_control() || INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// File name without its final extension.
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_filename("AC/DC: Back in Black?"), "AC_DC_ Back in Black_");
        assert_eq!(sanitize_filename("..."), "unnamed");
        assert_eq!(sanitize_filename(" 歌曲 "), "歌曲");
        assert_eq!(sanitize_filename(&"a".repeat(500)).chars().count(), MAX_NAME_CHARS);
    }

    #[test]
    fn test_strip_extension() {
        assert_eq!(strip_extension("song.final.mp3"), "song.final");
        assert_eq!(strip_extension(".hidden"), ".hidden");
        assert_eq!(strip_extension("noext"), "noext");
    }
}

//! YouTube URL recognition.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtu.be",
    "www.youtu.be",
];

static VIDEO_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid regex"));

fn parse(input: &str) -> Option<Url> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    Url::parse(input)
        .or_else(|_| Url::parse(&format!("https://{}", input)))
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

fn host_of(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_ascii_lowercase())
}

pub fn is_youtube_url(input: &str) -> bool {
    parse(input)
        .and_then(|url| host_of(&url))
        .is_some_and(|host| YOUTUBE_HOSTS.contains(&host.as_str()))
}

pub fn is_valid_video_id(id: &str) -> bool {
    VIDEO_ID_RE.is_match(id)
}

/// Video id from watch, short, embed, shorts and live URLs.
pub fn extract_video_id(input: &str) -> Option<String> {
    let url = parse(input)?;
    let host = host_of(&url)?;
    if !YOUTUBE_HOSTS.contains(&host.as_str()) {
        return None;
    }

    let candidate = if host.ends_with("youtu.be") {
        url.path_segments()?.next().map(str::to_string)
    } else if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
        Some(v.into_owned())
    } else {
        let mut segments = url.path_segments()?;
        match segments.next() {
            Some("shorts" | "embed" | "live" | "v") => segments.next().map(str::to_string),
            _ => None,
        }
    };

    candidate.filter(|id| is_valid_video_id(id))
}

pub fn extract_playlist_id(input: &str) -> Option<String> {
    let url = parse(input)?;
    if !YOUTUBE_HOSTS.contains(&host_of(&url)?.as_str()) {
        return None;
    }
    url.query_pairs()
        .find(|(k, _)| k == "list")
        .map(|(_, v)| v.into_owned())
        .filter(|id| !id.is_empty())
}

/// A URL that names a playlist rather than one video in it.
pub fn is_playlist_url(input: &str) -> bool {
    let Some(url) = parse(input) else {
        return false;
    };
    let playlist_page = url.path().trim_end_matches('/') == "/playlist";
    extract_playlist_id(input).is_some() && (playlist_page || extract_video_id(input).is_none())
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

pub fn playlist_url(playlist_id: &str) -> String {
    format!("https://www.youtube.com/playlist?list={}", playlist_id)
}

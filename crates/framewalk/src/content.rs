use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|]"#).unwrap());
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Movie,
    Series,
}

impl ContentKind {
    pub fn is_series(&self) -> bool {
        matches!(self, Self::Series)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Series => "series",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content page to resolve, fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    pub kind: ContentKind,
    pub url: String,
}

impl ContentRef {
    pub fn new(kind: ContentKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
        }
    }

    /// Classifies a content URL by the series path marker (e.g. `/serietv/`).
    pub fn from_url(url: impl Into<String>, series_path_marker: &str) -> Self {
        let url = url.into();
        let kind = if url.contains(series_path_marker) {
            ContentKind::Series
        } else {
            ContentKind::Movie
        };
        Self { kind, url }
    }
}

/// One episode page, unique by `(season, episode)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRef {
    pub season: u32,
    pub episode: u32,
    pub url: String,
}

impl EpisodeRef {
    pub fn key(&self) -> (u32, u32) {
        (self.season, self.episode)
    }

    /// `SxxEyy` label used in logs, file names and screenshots.
    pub fn label(&self) -> String {
        format!("S{:02}E{:02}", self.season, self.episode)
    }
}

/// Absolute URL believed to point at an HLS master playlist.
///
/// Only the downstream transcoder confirms it actually is one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestUrl(String);

impl ManifestUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ManifestUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ManifestUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Replaces characters that are invalid in file names and collapses whitespace.
pub fn sanitize_filename(name: &str) -> String {
    let safe = UNSAFE_FILENAME_CHARS.replace_all(name, " ");
    WHITESPACE_RUN.replace_all(&safe, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_path_marker() {
        let series = ContentRef::from_url("https://onlineserietv.com/serietv/dark/", "/serietv/");
        assert_eq!(series.kind, ContentKind::Series);

        let movie = ContentRef::from_url("https://onlineserietv.com/film/heat/", "/serietv/");
        assert_eq!(movie.kind, ContentKind::Movie);
    }

    #[test]
    fn episode_label_is_zero_padded() {
        let ep = EpisodeRef {
            season: 2,
            episode: 11,
            url: String::new(),
        };
        assert_eq!(ep.label(), "S02E11");
        assert_eq!(ep.key(), (2, 11));
    }

    #[test]
    fn sanitizes_file_names() {
        assert_eq!(sanitize_filename("Who? Me: <Part 1/2>"), "Who Me Part 1 2");
        assert_eq!(sanitize_filename("  a\t\tb  "), "a b");
        assert_eq!(sanitize_filename("plain"), "plain");
    }
}

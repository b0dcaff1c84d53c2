use std::sync::LazyLock;

use regex::Regex;

use crate::config::DEFAULT_SERIES_FRAME_MARKER;

static DEFAULT_LOCATOR: LazyLock<HrefLocator> =
    LazyLock::new(|| HrefLocator::new(DEFAULT_SERIES_FRAME_MARKER));

/// `(contentId, season, episode)` parsed out of an episode-page link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EpisodeCoords {
    pub content_id: String,
    pub season: u32,
    pub episode: u32,
}

/// Pattern matcher for `/<marker>/<contentId>/<season>/<episode>/` links.
///
/// The trailing slash is optional; query strings and fragments after the
/// episode number are ignored.
#[derive(Debug, Clone)]
pub struct HrefLocator {
    re: Regex,
}

impl HrefLocator {
    pub fn new(marker: &str) -> Self {
        let pattern = format!(
            r"/{}/(\d+)/(\d+)/(\d+)(?:/|[?#]|$)",
            regex::escape(marker.trim_matches('/'))
        );
        // the marker is escaped, so the pattern is always valid
        let re = Regex::new(&pattern).expect("escaped href pattern");
        Self { re }
    }

    pub fn locate(&self, href: &str) -> Option<EpisodeCoords> {
        let caps = self.re.captures(href)?;
        let content_id = caps.get(1)?.as_str().to_owned();
        let season = caps.get(2)?.as_str().parse().ok()?;
        let episode = caps.get(3)?.as_str().parse().ok()?;
        Some(EpisodeCoords {
            content_id,
            season,
            episode,
        })
    }
}

impl Default for HrefLocator {
    fn default() -> Self {
        DEFAULT_LOCATOR.clone()
    }
}

//! Season and episode listing walker for series pages.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::{debug, info, warn};
use url::Url;

use crate::browser::BrowserSession;
use crate::config::{ResolverConfig, SiteConfig, Timeouts, ms};
use crate::content::{EpisodeRef, sanitize_filename};
use crate::error::ResolveError;
use crate::href::HrefLocator;
use crate::listing;
use crate::retry::capture_screenshot;
use crate::selection::SelectionSpec;

const FALLBACK_TITLE: &str = "Serie";

/// Everything learned from a series page before resolution starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesListing {
    /// Sanitised series title, used for output paths.
    pub title: String,
    /// URL of the selection page carrying the season listing.
    pub selection_url: String,
    /// Selected episodes, unique by `(season, episode)` and sorted ascending.
    pub episodes: Vec<EpisodeRef>,
}

pub struct EpisodeEnumerator<'a> {
    site: &'a SiteConfig,
    timeouts: &'a Timeouts,
    debug_dir: &'a Path,
    locator: HrefLocator,
}

impl<'a> EpisodeEnumerator<'a> {
    pub fn new(config: &'a ResolverConfig) -> Self {
        Self {
            site: &config.site,
            timeouts: &config.timeouts,
            debug_dir: &config.debug_dir,
            locator: HrefLocator::new(&config.site.series_frame_marker),
        }
    }

    /// Walks the listing of `series_url` and returns the selected episodes.
    ///
    /// Any failure to read the listing is an
    /// [`ResolveError::EnumerationFailure`]; a single season page that does
    /// not load is skipped with a warning.
    pub async fn enumerate(
        &self,
        session: &mut dyn BrowserSession,
        series_url: &str,
        season_filter: &SelectionSpec,
        episode_filter: &SelectionSpec,
    ) -> Result<SeriesListing, ResolveError> {
        let (title, selection_url) = match self.open_series_page(session, series_url).await {
            Ok(found) => found,
            Err(e) => {
                capture_screenshot(session, self.debug_dir, "error_series_page").await;
                return Err(e);
            }
        };
        info!(title = %title, url = %selection_url, "Series page loaded");

        let base = parse_url(&selection_url)?;
        session
            .navigate(&selection_url, ms(self.timeouts.navigation_ms))
            .await
            .map_err(|e| failure(format!("cannot open season listing: {e}")))?;
        session
            .wait_for_element(&self.site.season_links, ms(self.timeouts.episode_list_ms))
            .await
            .map_err(|e| failure(format!("season listing not found: {e}")))?;
        let html = session
            .current_html()
            .await
            .map_err(|e| failure(format!("cannot read season listing: {e}")))?;
        let season_links = listing::anchor_hrefs(&html, &self.site.season_links, &base)?;
        if season_links.is_empty() {
            return Err(failure("season listing is empty"));
        }

        let mut visited = BTreeSet::new();
        let mut found: BTreeMap<(u32, u32), String> = BTreeMap::new();

        for link in season_links {
            let Some(coords) = self.locator.locate(&link) else {
                debug!(href = %link, "Skipping non-season link");
                continue;
            };
            if coords.season == 0 {
                debug!(href = %link, "Skipping season 0 link");
                continue;
            }
            if !season_filter.contains(coords.season) || !visited.insert(coords.season) {
                continue;
            }

            match self.season_episodes(session, &link, coords.season, episode_filter).await {
                Ok(list) => {
                    debug!(season = coords.season, count = list.len(), "Season listed");
                    for (episode, url) in list {
                        found.entry((coords.season, episode)).or_insert(url);
                    }
                }
                Err(e) => warn!(season = coords.season, error = %e, "Skipping season"),
            }
        }

        let episodes: Vec<EpisodeRef> = found
            .into_iter()
            .map(|((season, episode), url)| EpisodeRef {
                season,
                episode,
                url,
            })
            .collect();
        if episodes.is_empty() {
            warn!(
                seasons = %season_filter,
                episodes = %episode_filter,
                "No episode matches the selection"
            );
        }
        info!(count = episodes.len(), "Episodes selected");

        Ok(SeriesListing {
            title,
            selection_url,
            episodes,
        })
    }

    async fn open_series_page(
        &self,
        session: &mut dyn BrowserSession,
        series_url: &str,
    ) -> Result<(String, String), ResolveError> {
        let selector = self.site.selection_frame_selector(true);

        session
            .navigate(series_url, ms(self.timeouts.navigation_ms))
            .await
            .map_err(|e| failure(format!("cannot open series page: {e}")))?;
        session
            .wait_for_element(&selector, ms(self.timeouts.series_page_ms))
            .await
            .map_err(|e| failure(format!("selection iframe not found: {e}")))?;

        let html = session
            .current_html()
            .await
            .map_err(|e| failure(format!("cannot read series page: {e}")))?;
        let title = listing::page_title(&html)
            .map(|t| sanitize_filename(&t))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| FALLBACK_TITLE.to_string());

        let src = session
            .attribute(&selector, "src")
            .await
            .map_err(|e| failure(format!("cannot read selection iframe: {e}")))?
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| failure("selection iframe has no src"))?;
        let selection_url = parse_url(series_url)?
            .join(src.trim())
            .map_err(|e| failure(format!("bad selection iframe src {src:?}: {e}")))?;

        Ok((title, selection_url.to_string()))
    }

    /// Episodes listed on one season page, after the season cross-check and
    /// the episode filter.
    async fn season_episodes(
        &self,
        session: &mut dyn BrowserSession,
        season_url: &str,
        season: u32,
        filter: &SelectionSpec,
    ) -> Result<Vec<(u32, String)>, ResolveError> {
        session
            .navigate(season_url, ms(self.timeouts.navigation_ms))
            .await?;
        session
            .wait_for_element(
                &self.site.episode_container,
                ms(self.timeouts.episode_list_ms),
            )
            .await?;
        let html = session.current_html().await?;
        let base = parse_url(season_url)?;
        let links = listing::anchor_hrefs(&html, &self.site.episode_links, &base)?;

        let mut list = Vec::new();
        for link in links {
            let Some(coords) = self.locator.locate(&link) else {
                continue;
            };
            if coords.episode == 0 {
                debug!(season, href = %link, "Skipping episode 0 link");
                continue;
            }
            if coords.season != season {
                debug!(
                    season,
                    listed = coords.season,
                    href = %link,
                    "Episode link from another season"
                );
                continue;
            }
            if filter.contains(coords.episode) {
                list.push((coords.episode, link));
            }
        }
        Ok(list)
    }
}

fn failure(message: impl Into<String>) -> ResolveError {
    ResolveError::EnumerationFailure(message.into())
}

fn parse_url(url: &str) -> Result<Url, ResolveError> {
    Url::parse(url).map_err(|e| failure(format!("invalid url {url:?}: {e}")))
}

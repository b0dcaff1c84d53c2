//! Frame-traversal state machine.
//!
//! One call to [`PlayerResolver::resolve`] is one attempt: it walks
//! `TopPage -> SelectionFrame -> PlayerActivated -> NestedFrame -> Extracted`
//! on the page currently loaded in the session and always returns with the
//! session back at the top-level document. Recovery is left to the retry
//! controller.

use std::fmt;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::{BrowserError, BrowserSession};
use crate::config::{SiteConfig, Timeouts, ms};
use crate::content::{ContentKind, ManifestUrl};
use crate::error::{FailureReason, ResolveError};
use crate::script;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    TopPage,
    SelectionFrame,
    PlayerActivated,
    NestedFrame,
    Extracted,
}

impl ResolverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopPage => "top_page",
            Self::SelectionFrame => "selection_frame",
            Self::PlayerActivated => "player_activated",
            Self::NestedFrame => "nested_frame",
            Self::Extracted => "extracted",
        }
    }
}

impl fmt::Display for ResolverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transient record of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionAttempt {
    /// 1-based attempt index.
    pub attempt: u32,
    /// Frames entered below the top-level document when the attempt stopped.
    pub depth: usize,
    /// Last state reached.
    pub state: ResolverState,
    /// Set when the attempt failed.
    pub reason: Option<FailureReason>,
}

impl ResolutionAttempt {
    pub fn new(attempt: u32) -> Self {
        Self {
            attempt,
            depth: 0,
            state: ResolverState::TopPage,
            reason: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.reason.is_some()
    }
}

#[derive(Debug, Error)]
#[error("attempt {} failed at {} (depth {}): {source}", .attempt.attempt, .attempt.state, .attempt.depth)]
pub struct AttemptError {
    pub attempt: ResolutionAttempt,
    #[source]
    pub source: ResolveError,
}

impl AttemptError {
    pub fn new(mut attempt: ResolutionAttempt, source: ResolveError) -> Self {
        attempt.reason = Some(source.reason());
        Self { attempt, source }
    }

    pub fn reason(&self) -> FailureReason {
        self.source.reason()
    }
}

pub struct PlayerResolver<'a> {
    site: &'a SiteConfig,
    timeouts: &'a Timeouts,
}

impl<'a> PlayerResolver<'a> {
    pub fn new(site: &'a SiteConfig, timeouts: &'a Timeouts) -> Self {
        Self { site, timeouts }
    }

    /// Whether `page_url` is itself a selection page, so the top-level
    /// document plays the role of the selection frame.
    pub fn is_selection_page(&self, page_url: &str, kind: ContentKind) -> bool {
        let marker = self.site.frame_marker(kind.is_series()).trim_matches('/');
        !marker.is_empty() && page_url.contains(&format!("/{marker}/"))
    }

    /// Runs one attempt on the page currently loaded in `session`.
    pub async fn resolve(
        &self,
        session: &mut dyn BrowserSession,
        page_url: &str,
        kind: ContentKind,
        attempt: u32,
    ) -> Result<ManifestUrl, AttemptError> {
        let mut record = ResolutionAttempt::new(attempt);
        let result = self.walk(session, page_url, kind, &mut record).await;

        // frame context never outlives the attempt
        if let Err(e) = session.exit_to_top().await {
            warn!(attempt, error = %e, "Failed to return to top-level document");
        }

        match result {
            Ok(url) => {
                debug!(attempt, depth = record.depth, "Manifest extracted");
                Ok(url)
            }
            Err(source) => Err(AttemptError::new(record, source)),
        }
    }

    async fn walk(
        &self,
        session: &mut dyn BrowserSession,
        page_url: &str,
        kind: ContentKind,
        record: &mut ResolutionAttempt,
    ) -> Result<ManifestUrl, ResolveError> {
        let t = self.timeouts;

        if self.is_selection_page(page_url, kind) {
            debug!(url = page_url, "Page is the selection frame itself");
        } else {
            let selector = self.site.selection_frame_selector(kind.is_series());
            session
                .enter_frame(&selector, ms(t.selection_frame_ms))
                .await
                .map_err(|e| required(e, "selection iframe"))?;
            record.depth = session.frame_depth();
        }
        record.state = ResolverState::SelectionFrame;
        session.wait_for_ready(ms(t.frame_ready_ms)).await?;

        self.ensure_player(session).await?;

        self.activate_player(session).await;
        record.state = ResolverState::PlayerActivated;

        if session
            .is_visible(&self.site.captcha, ms(t.captcha_check_ms))
            .await
            .unwrap_or(false)
        {
            return Err(ResolveError::CaptchaDetected);
        }

        session
            .enter_frame(&self.site.nested_frame, ms(t.nested_frame_ms))
            .await
            .map_err(|e| required(e, "nested player iframe"))?;
        record.depth = session.frame_depth();
        record.state = ResolverState::NestedFrame;

        self.nudge_playback(session).await;

        let html = session.current_html().await?;
        let url = script::extract_manifest(&html)?;
        record.state = ResolverState::Extracted;
        Ok(url)
    }

    /// Forces the configured player in the selection frame. A missing
    /// control means the page already defaults to it.
    async fn ensure_player(&self, session: &mut dyn BrowserSession) -> Result<(), ResolveError> {
        let t = self.timeouts;
        let selector = self.site.player_select.as_str();
        let target = self.site.player_id.as_str();

        if let Err(e) = session
            .wait_for_element(selector, ms(t.player_select_ms))
            .await
        {
            return tolerate(e, "player selector absent, keeping default player");
        }

        let current = match session.input_value(selector).await {
            Ok(value) => value,
            Err(e) => return tolerate(e, "player selector unreadable"),
        };
        if current.as_deref() == Some(target) {
            debug!(player = target, "Player already selected");
            return Ok(());
        }

        info!(
            current = current.as_deref().unwrap_or("default"),
            target, "Switching player"
        );
        if let Err(e) = session.select_option(selector, target).await {
            return tolerate(e, "player selector vanished before switching");
        }

        // switching may reload the selection frame
        sleep(ms(t.player_switch_settle_ms)).await;
        session.wait_for_ready(ms(t.frame_ready_ms)).await?;
        Ok(())
    }

    async fn activate_player(&self, session: &mut dyn BrowserSession) {
        let image = self.site.activation_image.as_str();
        let clicked = match session
            .wait_for_element(image, ms(self.timeouts.activation_ms))
            .await
        {
            Ok(()) => session.click(image).await,
            Err(e) => Err(e),
        };
        if let Err(e) = clicked {
            debug!(error = %e, "Activation image not clicked");
        }
    }

    /// Best-effort click on the play control so the vendor script renders.
    async fn nudge_playback(&self, session: &mut dyn BrowserSession) {
        let control = self.site.play_control.as_str();
        let clicked = match session
            .wait_for_element(control, ms(self.timeouts.play_control_ms))
            .await
        {
            Ok(()) => session.click(control).await,
            Err(e) => Err(e),
        };
        match clicked {
            Ok(()) => sleep(ms(self.timeouts.play_settle_ms)).await,
            Err(e) => debug!(error = %e, "Play control not clicked"),
        }
    }
}

fn required(error: BrowserError, what: &str) -> ResolveError {
    if error.is_not_found() {
        ResolveError::element_missing(what)
    } else {
        error.into()
    }
}

fn tolerate(error: BrowserError, context: &str) -> Result<(), ResolveError> {
    if error.is_not_found() {
        debug!(error = %error, "{context}");
        Ok(())
    } else {
        Err(error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeBrowser, FakeDocument};

    const PLAYER_FRAME: &str = include_str!("../tests/fixtures/player_frame.html");
    const MOVIE_URL: &str = "https://onlineserietv.com/film/heat/";
    const EPISODE_URL: &str = "https://onlineserietv.com/streaming-serie-tv/4512/2/3/";

    fn nested(site: &SiteConfig) -> FakeDocument {
        FakeDocument::new()
            .with_element(&site.play_control)
            .with_html(PLAYER_FRAME)
    }

    fn selection(site: &SiteConfig, player: &str) -> FakeDocument {
        FakeDocument::new()
            .with_value(&site.player_select, player)
            .with_element(&site.activation_image)
            .with_frame(&site.nested_frame, nested(site))
    }

    async fn run(
        site: &SiteConfig,
        browser: &mut FakeBrowser,
        url: &str,
        kind: ContentKind,
    ) -> Result<ManifestUrl, AttemptError> {
        let timeouts = Timeouts::immediate();
        let resolver = PlayerResolver::new(site, &timeouts);
        browser.navigate(url, ms(0)).await.unwrap();
        resolver.resolve(browser, url, kind, 1).await
    }

    #[tokio::test]
    async fn movie_walks_both_frames_and_unwinds() {
        let site = SiteConfig::default();
        let page = FakeDocument::new()
            .with_frame(&site.selection_frame_selector(false), selection(&site, "fx"));
        let mut browser = FakeBrowser::new().with_page(MOVIE_URL, page);

        let url = run(&site, &mut browser, MOVIE_URL, ContentKind::Movie)
            .await
            .unwrap();

        assert_eq!(url.as_str(), "https://cdn.flexy/hls/a1b2c3/master.m3u8");
        assert_eq!(browser.frame_depth(), 0);
        let log = browser.log();
        assert!(log.contains(&format!("click {}", site.activation_image)));
        assert!(log.contains(&format!("click {}", site.play_control)));
        assert_eq!(log.iter().filter(|e| *e == "exit_frame").count(), 2);
        assert!(!log.iter().any(|e| e.starts_with("select ")));
    }

    #[tokio::test]
    async fn selection_page_starts_in_selection_frame() {
        let site = SiteConfig::default();
        let mut browser = FakeBrowser::new().with_page(EPISODE_URL, selection(&site, "mx"));

        let url = run(&site, &mut browser, EPISODE_URL, ContentKind::Series)
            .await
            .unwrap();

        assert_eq!(url.as_str(), "https://cdn.flexy/hls/a1b2c3/master.m3u8");
        let log = browser.log();
        assert!(log.contains(&format!("select {}=fx", site.player_select)));
        assert_eq!(
            log.iter().filter(|e| e.starts_with("enter_frame")).count(),
            1
        );
        assert_eq!(browser.frame_depth(), 0);
    }

    #[tokio::test]
    async fn player_switch_reload_continues_in_new_document() {
        let site = SiteConfig::default();
        // before the switch the frame offers no player at all
        let before = FakeDocument::new()
            .with_value(&site.player_select, "mx")
            .reloads_on_select(selection(&site, "fx"));
        let page =
            FakeDocument::new().with_frame(&site.selection_frame_selector(false), before);
        let mut browser = FakeBrowser::new().with_page(MOVIE_URL, page);

        let url = run(&site, &mut browser, MOVIE_URL, ContentKind::Movie)
            .await
            .unwrap();

        assert_eq!(url.as_str(), "https://cdn.flexy/hls/a1b2c3/master.m3u8");
        let log = browser.log();
        let reloaded = log.iter().position(|e| e == "frame reloaded").unwrap();
        let activated = log
            .iter()
            .position(|e| *e == format!("click {}", site.activation_image))
            .unwrap();
        let nested = log
            .iter()
            .position(|e| *e == format!("enter_frame {}", site.nested_frame))
            .unwrap();
        assert!(reloaded < activated && activated < nested);
        assert_eq!(browser.frame_depth(), 0);
    }

    #[tokio::test]
    async fn optional_elements_are_tolerated() {
        let site = SiteConfig::default();
        let bare_nested = FakeDocument::new().with_html(PLAYER_FRAME);
        let page = FakeDocument::new().with_frame(&site.nested_frame, bare_nested);
        let mut browser = FakeBrowser::new().with_page(EPISODE_URL, page);

        let url = run(&site, &mut browser, EPISODE_URL, ContentKind::Series).await;
        assert!(url.is_ok());
        assert!(!browser.log().iter().any(|e| e.starts_with("click ")));
    }

    #[tokio::test]
    async fn missing_selection_iframe() {
        let site = SiteConfig::default();
        let mut browser = FakeBrowser::new().with_page(MOVIE_URL, FakeDocument::new());

        let err = run(&site, &mut browser, MOVIE_URL, ContentKind::Movie)
            .await
            .unwrap_err();

        assert_eq!(err.reason(), FailureReason::ElementMissing);
        assert_eq!(err.attempt.state, ResolverState::TopPage);
        assert_eq!(err.attempt.depth, 0);
        assert!(err.attempt.is_failed());
    }

    #[tokio::test]
    async fn captcha_aborts_before_nested_frame() {
        let site = SiteConfig::default();
        let page = selection(&site, "fx").with_visible(&site.captcha);
        let mut browser = FakeBrowser::new().with_page(EPISODE_URL, page);

        let err = run(&site, &mut browser, EPISODE_URL, ContentKind::Series)
            .await
            .unwrap_err();

        assert_eq!(err.reason(), FailureReason::CaptchaDetected);
        assert_eq!(err.attempt.state, ResolverState::PlayerActivated);
        assert!(!browser.log().iter().any(|e| e.starts_with("enter_frame")));
    }

    #[tokio::test]
    async fn missing_nested_frame_unwinds_selection_frame() {
        let site = SiteConfig::default();
        let selection = FakeDocument::new().with_value(&site.player_select, "fx");
        let page =
            FakeDocument::new().with_frame(&site.selection_frame_selector(false), selection);
        let mut browser = FakeBrowser::new().with_page(MOVIE_URL, page);

        let err = run(&site, &mut browser, MOVIE_URL, ContentKind::Movie)
            .await
            .unwrap_err();

        assert_eq!(err.reason(), FailureReason::ElementMissing);
        assert_eq!(err.attempt.depth, 1);
        assert_eq!(err.attempt.state, ResolverState::PlayerActivated);
        assert_eq!(browser.frame_depth(), 0);
    }

    #[tokio::test]
    async fn nested_frame_without_script() {
        let site = SiteConfig::default();
        let empty_nested = FakeDocument::new().with_html("<html><body></body></html>");
        let page = FakeDocument::new().with_frame(&site.nested_frame, empty_nested);
        let mut browser = FakeBrowser::new().with_page(EPISODE_URL, page);

        let err = run(&site, &mut browser, EPISODE_URL, ContentKind::Series)
            .await
            .unwrap_err();

        assert_eq!(err.reason(), FailureReason::ScriptNotFound);
        assert_eq!(err.attempt.state, ResolverState::NestedFrame);
        assert_eq!(err.attempt.depth, 1);
        assert_eq!(browser.frame_depth(), 0);
    }

    #[test]
    fn detects_selection_pages() {
        let site = SiteConfig::default();
        let timeouts = Timeouts::immediate();
        let resolver = PlayerResolver::new(&site, &timeouts);
        assert!(resolver.is_selection_page(EPISODE_URL, ContentKind::Series));
        assert!(!resolver.is_selection_page(EPISODE_URL, ContentKind::Movie));
        assert!(!resolver.is_selection_page(
            "https://onlineserietv.com/serietv/dark/",
            ContentKind::Series
        ));
    }
}

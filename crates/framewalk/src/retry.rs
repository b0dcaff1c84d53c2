//! Bounded retries around the player resolver.

use std::path::{Path, PathBuf};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::browser::BrowserSession;
use crate::config::{ResolverConfig, RetryPolicy, Timeouts, ms};
use crate::content::{ContentKind, EpisodeRef, ManifestUrl};
use crate::error::FailureReason;
use crate::resolver::{AttemptError, PlayerResolver, ResolutionAttempt};

/// What is being resolved, used to tag logs and the failure screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptTag {
    Movie,
    Episode { season: u32, episode: u32 },
}

impl AttemptTag {
    pub fn for_episode(episode: &EpisodeRef) -> Self {
        Self::Episode {
            season: episode.season,
            episode: episode.episode,
        }
    }

    fn screenshot_stem(&self) -> String {
        match self {
            Self::Movie => "error_movie".to_string(),
            Self::Episode { season, episode } => format!("error_S{season:02}E{episode:02}"),
        }
    }
}

/// Outcome of a full retry cycle for one page.
#[derive(Debug, Default)]
pub struct Resolution {
    pub manifest: Option<ManifestUrl>,
    /// Failed attempts, in order.
    pub failures: Vec<ResolutionAttempt>,
    /// Screenshot persisted once the budget ran out.
    pub screenshot: Option<PathBuf>,
    pub cancelled: bool,
}

impl Resolution {
    pub fn last_reason(&self) -> Option<FailureReason> {
        self.failures.last().and_then(|a| a.reason)
    }
}

pub struct RetryController<'a> {
    resolver: PlayerResolver<'a>,
    policy: &'a RetryPolicy,
    timeouts: &'a Timeouts,
    debug_dir: &'a Path,
}

impl<'a> RetryController<'a> {
    pub fn new(config: &'a ResolverConfig) -> Self {
        Self {
            resolver: PlayerResolver::new(&config.site, &config.timeouts),
            policy: &config.retry,
            timeouts: &config.timeouts,
            debug_dir: &config.debug_dir,
        }
    }

    /// Resolves `page_url` into a manifest URL within the attempt budget.
    ///
    /// The first attempt opens the page, later ones reload it after a pause.
    /// On exhaustion exactly one full-page screenshot is written to the debug
    /// directory. Cancellation drops the running attempt, returns the session
    /// to the top-level document and skips the screenshot.
    pub async fn resolve(
        &self,
        session: &mut dyn BrowserSession,
        page_url: &str,
        kind: ContentKind,
        tag: AttemptTag,
        cancel: &CancellationToken,
    ) -> Resolution {
        let mut resolution = Resolution::default();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut loaded = false;

        for attempt in 1..=max_attempts {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = self.attempt(session, page_url, kind, attempt, &mut loaded) => Some(outcome),
            };
            let Some(outcome) = outcome else {
                info!(?tag, attempt, "Resolution cancelled");
                // the dropped attempt may have left frames entered
                unwind(session).await;
                resolution.cancelled = true;
                return resolution;
            };

            match outcome {
                Ok(manifest) => {
                    info!(?tag, attempt, url = %manifest, "Manifest resolved");
                    resolution.manifest = Some(manifest);
                    return resolution;
                }
                Err(err) => {
                    warn!(
                        ?tag,
                        attempt,
                        max_attempts,
                        reason = %err.reason(),
                        depth = err.attempt.depth,
                        "Attempt failed: {}",
                        err.source
                    );
                    let retryable = err.source.is_retryable();
                    resolution.failures.push(err.attempt);
                    if !retryable {
                        break;
                    }
                }
            }

            if self.policy.should_retry(attempt) {
                let delay = self.policy.delay_for_attempt(attempt + 1);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        resolution.cancelled = true;
                        return resolution;
                    }
                    _ = sleep(delay) => {}
                }
            }
        }

        warn!(
            ?tag,
            attempts = resolution.failures.len(),
            reason = ?resolution.last_reason(),
            "All attempts failed"
        );
        resolution.screenshot =
            capture_screenshot(session, self.debug_dir, &tag.screenshot_stem()).await;
        resolution
    }

    async fn attempt(
        &self,
        session: &mut dyn BrowserSession,
        page_url: &str,
        kind: ContentKind,
        attempt: u32,
        loaded: &mut bool,
    ) -> Result<ManifestUrl, AttemptError> {
        let timeout = ms(self.timeouts.navigation_ms);
        let opened = if *loaded {
            info!(attempt, "Reloading page");
            session.reload(timeout).await
        } else {
            info!(attempt, url = page_url, "Opening page");
            session.navigate(page_url, timeout).await
        };
        opened.map_err(|e| AttemptError::new(ResolutionAttempt::new(attempt), e.into()))?;
        *loaded = true;

        self.resolver.resolve(session, page_url, kind, attempt).await
    }
}

async fn unwind(session: &mut dyn BrowserSession) {
    if let Err(e) = session.exit_to_top().await {
        warn!(error = %e, "Failed to return to top-level document");
    }
}

/// Writes a full-page screenshot named `<stem>_<unix seconds>.png` under
/// `dir`. Failures are logged, never propagated.
pub(crate) async fn capture_screenshot(
    session: &mut dyn BrowserSession,
    dir: &Path,
    stem: &str,
) -> Option<PathBuf> {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!(dir = %dir.display(), error = %e, "Cannot create debug directory");
        return None;
    }

    let path = dir.join(format!("{stem}_{}.png", chrono::Utc::now().timestamp()));
    match session.screenshot(&path).await {
        Ok(()) => {
            warn!(path = %path.display(), "Saved debug screenshot");
            Some(path)
        }
        Err(e) => {
            warn!(error = %e, "Failed to save debug screenshot");
            None
        }
    }
}

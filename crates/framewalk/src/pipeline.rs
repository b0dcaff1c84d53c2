//! Drives one content item end to end: enumerate, resolve, transcode.
//!
//! Items are processed strictly one after another on a single browser
//! session. Per-item failures are recorded and never stop the batch.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::browser::BrowserSession;
use crate::config::ResolverConfig;
use crate::content::{ContentKind, ContentRef, EpisodeRef, ManifestUrl, sanitize_filename};
use crate::enumerator::EpisodeEnumerator;
use crate::error::{FailureReason, TranscodeError};
use crate::listing;
use crate::retry::{AttemptTag, RetryController};
use crate::selection::SelectionSpec;
use crate::transcoder::{TranscodeEvent, TranscodeOutcome, TranscodeRequest, Transcoder};

const MOVIE_FALLBACK_TITLE: &str = "Film";
const DIRECT_FALLBACK_NAME: &str = "video";

/// `<out>/Film/<title>/<title>.mp4`
pub fn movie_output(output_dir: &Path, title: &str) -> PathBuf {
    output_dir
        .join("Film")
        .join(title)
        .join(format!("{title}.mp4"))
}

/// `<out>/Serie/<title>/Sxx/<title> - SxxEyy.mp4`
pub fn episode_output(output_dir: &Path, title: &str, episode: &EpisodeRef) -> PathBuf {
    output_dir
        .join("Serie")
        .join(title)
        .join(format!("S{:02}", episode.season))
        .join(format!("{title} - {}.mp4", episode.label()))
}

/// `<out>/<name>.mp4`, for manifests given directly.
pub fn direct_output(output_dir: &Path, name: &str) -> PathBuf {
    output_dir.join(format!("{name}.mp4"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Downloaded(PathBuf),
    /// Output already present on disk.
    Skipped(PathBuf),
    Unresolved {
        reason: Option<FailureReason>,
        screenshot: Option<PathBuf>,
    },
    TranscodeFailed(String),
}

impl ItemStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Downloaded(_) | Self::Skipped(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    /// `SxxEyy` for episodes, the title for movies.
    pub label: String,
    pub status: ItemStatus,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub title: Option<String>,
    pub items: Vec<ItemReport>,
    pub enumeration_error: Option<String>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.status.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    /// Whether the run as a whole failed: the listing could not be read, or
    /// every attempted item failed.
    pub fn is_failure(&self) -> bool {
        self.enumeration_error.is_some() || (!self.items.is_empty() && self.succeeded() == 0)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(error) = &self.enumeration_error {
            return write!(f, "enumeration failed: {error}");
        }
        write!(
            f,
            "{} succeeded, {} failed",
            self.succeeded(),
            self.failed()
        )?;
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}

pub struct Pipeline<'a> {
    config: &'a ResolverConfig,
    transcoder: &'a dyn Transcoder,
    output_dir: PathBuf,
    cancel: CancellationToken,
    events: Option<mpsc::Sender<TranscodeEvent>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a ResolverConfig,
        transcoder: &'a dyn Transcoder,
        output_dir: impl Into<PathBuf>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            transcoder,
            output_dir: output_dir.into(),
            cancel,
            events: None,
        }
    }

    /// Forwards transcoder progress to `events`.
    pub fn with_events(mut self, events: mpsc::Sender<TranscodeEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn run(
        &self,
        session: &mut dyn BrowserSession,
        content: &ContentRef,
        seasons: &SelectionSpec,
        episodes: &SelectionSpec,
    ) -> RunReport {
        info!(kind = %content.kind, url = %content.url, "Processing content");
        match content.kind {
            ContentKind::Series => self.run_series(session, &content.url, seasons, episodes).await,
            ContentKind::Movie => self.run_movie(session, &content.url).await,
        }
    }

    async fn run_series(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
        seasons: &SelectionSpec,
        episodes: &SelectionSpec,
    ) -> RunReport {
        let mut report = RunReport::default();
        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return report;
        }

        let enumerator = EpisodeEnumerator::new(self.config);
        let listing = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                report.cancelled = true;
                return report;
            }
            listing = enumerator.enumerate(session, url, seasons, episodes) => listing,
        };
        let listing = match listing {
            Ok(listing) => listing,
            Err(e) => {
                error!(url, error = %e, "Cannot enumerate episodes");
                report.enumeration_error = Some(e.to_string());
                return report;
            }
        };
        report.title = Some(listing.title.clone());

        let controller = RetryController::new(self.config);
        for (index, episode) in listing.episodes.iter().enumerate() {
            if index > 0 && !self.pause().await {
                report.cancelled = true;
                break;
            }

            let label = episode.label();
            info!(episode = %label, url = %episode.url, "Resolving episode");
            let resolution = controller
                .resolve(
                    session,
                    &episode.url,
                    ContentKind::Series,
                    AttemptTag::for_episode(episode),
                    &self.cancel,
                )
                .await;
            if resolution.cancelled {
                report.cancelled = true;
                break;
            }

            let reason = resolution.last_reason();
            let status = match resolution.manifest {
                Some(manifest) => {
                    let output = episode_output(&self.output_dir, &listing.title, episode);
                    let request = self.request(manifest, output);
                    match self.transcode(&request).await {
                        Ok(status) => status,
                        Err(TranscodeError::Cancelled) => {
                            report.cancelled = true;
                            break;
                        }
                        Err(e) => ItemStatus::TranscodeFailed(e.to_string()),
                    }
                }
                None => {
                    warn!(episode = %label, "No manifest found, skipping episode");
                    ItemStatus::Unresolved {
                        reason,
                        screenshot: resolution.screenshot,
                    }
                }
            };
            report.items.push(ItemReport { label, status });
        }

        report
    }

    async fn run_movie(&self, session: &mut dyn BrowserSession, url: &str) -> RunReport {
        let mut report = RunReport::default();
        let controller = RetryController::new(self.config);
        let resolution = controller
            .resolve(session, url, ContentKind::Movie, AttemptTag::Movie, &self.cancel)
            .await;
        if resolution.cancelled {
            report.cancelled = true;
            return report;
        }

        let title = match session.current_html().await {
            Ok(html) => listing::page_title(&html).map(|t| sanitize_filename(&t)),
            Err(e) => {
                warn!(error = %e, "Cannot read movie title");
                None
            }
        }
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| MOVIE_FALLBACK_TITLE.to_string());
        report.title = Some(title.clone());

        let reason = resolution.last_reason();
        let status = match resolution.manifest {
            Some(manifest) => {
                let request = self.request(manifest, movie_output(&self.output_dir, &title));
                match self.transcode(&request).await {
                    Ok(status) => status,
                    Err(TranscodeError::Cancelled) => {
                        report.cancelled = true;
                        return report;
                    }
                    Err(e) => ItemStatus::TranscodeFailed(e.to_string()),
                }
            }
            None => {
                error!(url, "No manifest found for movie");
                ItemStatus::Unresolved {
                    reason,
                    screenshot: resolution.screenshot,
                }
            }
        };
        report.items.push(ItemReport {
            label: title,
            status,
        });
        report
    }

    /// Saves an already known manifest as `<out>/<name>.mp4`, skipping
    /// resolution entirely.
    pub async fn download_manifest(&self, manifest: ManifestUrl, name: &str) -> RunReport {
        let name = Some(sanitize_filename(name))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DIRECT_FALLBACK_NAME.to_string());
        let mut report = RunReport {
            title: Some(name.clone()),
            ..RunReport::default()
        };
        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return report;
        }

        info!(url = %manifest, "Downloading manifest directly");
        let request = self.request(manifest, direct_output(&self.output_dir, &name));
        let status = match self.transcode(&request).await {
            Ok(status) => status,
            Err(TranscodeError::Cancelled) => {
                report.cancelled = true;
                return report;
            }
            Err(e) => ItemStatus::TranscodeFailed(e.to_string()),
        };
        report.items.push(ItemReport {
            label: name,
            status,
        });
        report
    }

    fn request(&self, manifest: ManifestUrl, output: PathBuf) -> TranscodeRequest {
        TranscodeRequest::new(manifest, output)
            .with_referer(&self.config.site.referer)
            .with_user_agent(&self.config.site.user_agent)
    }

    async fn transcode(&self, request: &TranscodeRequest) -> Result<ItemStatus, TranscodeError> {
        let events = match &self.events {
            Some(events) => events.clone(),
            None => mpsc::channel(1).0,
        };
        match self
            .transcoder
            .transcode(request, events, &self.cancel)
            .await
        {
            Ok(TranscodeOutcome::Completed) => Ok(ItemStatus::Downloaded(request.output.clone())),
            Ok(TranscodeOutcome::Skipped) => Ok(ItemStatus::Skipped(request.output.clone())),
            Err(e) => {
                if !matches!(e, TranscodeError::Cancelled) {
                    error!(output = %request.output.display(), error = %e, "Transcode failed");
                }
                Err(e)
            }
        }
    }

    /// Inter-item backpressure. Returns `false` when cancelled meanwhile.
    async fn pause(&self) -> bool {
        let delay = self.config.pacing.next_delay();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }
}

//! Framewalk: HLS manifest resolution behind nested player iframes.
//!
//! Given a movie or series page, framewalk drives a browser session through
//! the player-selection iframe and the vendor's nested player iframe, unpacks
//! the `eval(function(p,a,c,k,e,d){...})` script found there and recovers the
//! `.m3u8` manifest URL it declares.
//!
//! ## Component Overview
//!
//! - [`SelectionSpec`] - season/episode filter grammar (`all`, `N`, `N-M`, lists)
//! - [`HrefLocator`] - `(contentId, season, episode)` from episode-page links
//! - [`script`] and [`unpacker`] - packed script discovery and unpacking
//! - [`PlayerResolver`] - one frame-traversal attempt
//! - [`RetryController`] - bounded retries, reloads and the failure screenshot
//! - [`EpisodeEnumerator`] - ordered, de-duplicated episode work list
//! - [`Pipeline`] - enumerate, resolve and transcode one content item
//!
//! The browser engine and the transcoder are collaborators behind the
//! [`BrowserSession`] and [`Transcoder`] traits.

pub mod browser;
pub mod config;
pub mod content;
pub mod enumerator;
pub mod error;
pub mod href;
pub mod listing;
pub mod pipeline;
pub mod resolver;
pub mod retry;
pub mod script;
pub mod selection;
pub mod transcoder;
pub mod unpacker;

pub use browser::{BrowserError, BrowserSession};
pub use config::{Pacing, ResolverConfig, RetryPolicy, SiteConfig, Timeouts};
pub use content::{ContentKind, ContentRef, EpisodeRef, ManifestUrl, sanitize_filename};
pub use enumerator::{EpisodeEnumerator, SeriesListing};
pub use error::{FailureReason, ResolveError, TranscodeError};
pub use href::{EpisodeCoords, HrefLocator};
pub use pipeline::{ItemReport, ItemStatus, Pipeline, RunReport};
pub use resolver::{AttemptError, PlayerResolver, ResolutionAttempt, ResolverState};
pub use retry::{AttemptTag, Resolution, RetryController};
pub use script::{extract_manifest, find_manifest};
pub use selection::SelectionSpec;
pub use transcoder::{
    FfmpegTranscoder, TranscodeEvent, TranscodeOutcome, TranscodeRequest, Transcoder,
};

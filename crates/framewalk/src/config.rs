//! Resolver configuration.
//!
//! Every component receives the pieces it needs at construction; nothing here
//! is process-wide state.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://onlineserietv.com";
pub const DEFAULT_SERIES_FRAME_MARKER: &str = "streaming-serie-tv";
pub const DEFAULT_MOVIE_FRAME_MARKER: &str = "stream-film";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36";

/// Site layout: URL markers, selectors and the player to force.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    /// Path fragment identifying a series content page.
    pub series_path_marker: String,
    /// `src` fragment of the selection iframe on series pages.
    pub series_frame_marker: String,
    /// `src` fragment of the selection iframe on movie pages.
    pub movie_frame_marker: String,
    pub player_select: String,
    /// Option value of the player whose nested frame carries the packed script.
    pub player_id: String,
    pub activation_image: String,
    pub captcha: String,
    pub nested_frame: String,
    pub play_control: String,
    pub season_links: String,
    pub episode_links: String,
    pub episode_container: String,
    /// Referer sent to the transcoder; the vendor CDN rejects requests without it.
    pub referer: String,
    pub user_agent: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            series_path_marker: "/serietv/".to_string(),
            series_frame_marker: DEFAULT_SERIES_FRAME_MARKER.to_string(),
            movie_frame_marker: DEFAULT_MOVIE_FRAME_MARKER.to_string(),
            player_select: "select[name='sel_player']".to_string(),
            player_id: "fx".to_string(),
            activation_image: "img[src*='player.png']".to_string(),
            captcha: "input[name='capt']".to_string(),
            nested_frame: "iframe[src*='uprot.net/fxe'], iframe[src*='flexy.stream']"
                .to_string(),
            play_control: ".video-js".to_string(),
            season_links: "div.div_seasons a[href]".to_string(),
            episode_links: "div.div_episodes a[href]".to_string(),
            episode_container: "div.div_episodes".to_string(),
            referer: "https://flexy.stream/".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl SiteConfig {
    /// CSS selector of the selection iframe for the given content kind.
    pub fn selection_frame_selector(&self, series: bool) -> String {
        let marker = if series {
            &self.series_frame_marker
        } else {
            &self.movie_frame_marker
        };
        format!("iframe[src*='{marker}']")
    }

    pub fn frame_marker(&self, series: bool) -> &str {
        if series {
            &self.series_frame_marker
        } else {
            &self.movie_frame_marker
        }
    }
}

/// Bounds for every wait the resolver and enumerator perform, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub navigation_ms: u64,
    pub series_page_ms: u64,
    pub selection_frame_ms: u64,
    pub frame_ready_ms: u64,
    pub player_select_ms: u64,
    /// Pause after switching players, covering the reload it may trigger.
    pub player_switch_settle_ms: u64,
    pub activation_ms: u64,
    pub captcha_check_ms: u64,
    pub nested_frame_ms: u64,
    pub play_control_ms: u64,
    /// Pause after clicking the play control so the vendor script renders.
    pub play_settle_ms: u64,
    pub episode_list_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation_ms: 45_000,
            series_page_ms: 30_000,
            selection_frame_ms: 25_000,
            frame_ready_ms: 10_000,
            player_select_ms: 5_000,
            player_switch_settle_ms: 1_500,
            activation_ms: 3_000,
            captcha_check_ms: 2_000,
            nested_frame_ms: 20_000,
            play_control_ms: 1_000,
            play_settle_ms: 2_000,
            episode_list_ms: 20_000,
        }
    }
}

impl Timeouts {
    /// All waits set to zero, for tests driving an in-memory browser.
    pub fn immediate() -> Self {
        Self {
            navigation_ms: 0,
            series_page_ms: 0,
            selection_frame_ms: 0,
            frame_ready_ms: 0,
            player_select_ms: 0,
            player_switch_settle_ms: 0,
            activation_ms: 0,
            captcha_check_ms: 0,
            nested_frame_ms: 0,
            play_control_ms: 0,
            play_settle_ms: 0,
            episode_list_ms: 0,
        }
    }
}

pub(crate) fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// Attempt budget and pause schedule for the retry controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per page, including the first one.
    pub max_attempts: u32,
    /// Pause before the second attempt in milliseconds.
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each pause.
    pub use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Pause before attempt `attempt` (1-based). The first attempt never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay_ms as f64
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(2) as i32);
        let delay_ms = base_delay.min(self.max_delay_ms as f64) as u64;

        let final_delay = if self.use_jitter {
            let jitter = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay_ms + jitter
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Backpressure between consecutive items of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Pacing {
    pub delay_secs: f64,
    pub jitter_min_secs: f64,
    pub jitter_max_secs: f64,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            delay_secs: 2.0,
            jitter_min_secs: 0.5,
            jitter_max_secs: 1.5,
        }
    }
}

impl Pacing {
    pub const MAX_PAUSE: Duration = Duration::from_secs(3600);

    pub fn none() -> Self {
        Self {
            delay_secs: 0.0,
            jitter_min_secs: 0.0,
            jitter_max_secs: 0.0,
        }
    }

    /// Pause before the next item, capped at [`Pacing::MAX_PAUSE`]. Negative
    /// or NaN settings count as zero.
    pub fn next_delay(&self) -> Duration {
        let span = (self.jitter_max_secs - self.jitter_min_secs).max(0.0);
        let jitter = self.jitter_min_secs.max(0.0) + span * rand::random::<f64>();
        let secs = (self.delay_secs.max(0.0) + jitter).max(0.0);
        Duration::try_from_secs_f64(secs).map_or(Self::MAX_PAUSE, |d| d.min(Self::MAX_PAUSE))
    }
}

/// Everything the resolution pipeline needs, passed in explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub site: SiteConfig,
    pub timeouts: Timeouts,
    pub retry: RetryPolicy,
    pub pacing: Pacing,
    /// Where screenshots of exhausted resolutions are written.
    pub debug_dir: PathBuf,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            timeouts: Timeouts::default(),
            retry: RetryPolicy::default(),
            pacing: Pacing::default(),
            debug_dir: PathBuf::from("debug_screenshots"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_never_waits() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn retry_delay_calculation() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 3000,
            backoff_multiplier: 2.0,
            use_jitter: false,
        };

        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(3000)); // capped
    }

    #[test]
    fn jitter_stays_within_quarter() {
        let policy = RetryPolicy {
            initial_delay_ms: 1000,
            use_jitter: true,
            ..RetryPolicy::default()
        };
        for _ in 0..32 {
            let delay = policy.delay_for_attempt(2);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn should_retry_respects_budget() {
        let policy = RetryPolicy::default().with_max_attempts(3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert_eq!(RetryPolicy::default().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn pacing_delay_in_range() {
        let pacing = Pacing::default();
        for _ in 0..32 {
            let delay = pacing.next_delay().as_secs_f64();
            assert!((2.5..=3.5).contains(&delay));
        }
        assert_eq!(Pacing::none().next_delay(), Duration::ZERO);
    }

    #[test]
    fn pacing_delay_never_overflows() {
        let endless = Pacing {
            delay_secs: f64::INFINITY,
            ..Pacing::none()
        };
        assert_eq!(endless.next_delay(), Pacing::MAX_PAUSE);

        let huge_jitter = Pacing {
            jitter_max_secs: f64::MAX,
            ..Pacing::none()
        };
        assert!(huge_jitter.next_delay() <= Pacing::MAX_PAUSE);

        let nan = Pacing {
            delay_secs: f64::NAN,
            jitter_min_secs: f64::NAN,
            jitter_max_secs: f64::NAN,
        };
        assert_eq!(nan.next_delay(), Duration::ZERO);

        let negative = Pacing {
            delay_secs: -5.0,
            ..Pacing::none()
        };
        assert_eq!(negative.next_delay(), Duration::ZERO);
    }

    #[test]
    fn selection_frame_selector_by_kind() {
        let site = SiteConfig::default();
        assert_eq!(
            site.selection_frame_selector(true),
            "iframe[src*='streaming-serie-tv']"
        );
        assert_eq!(site.selection_frame_selector(false), "iframe[src*='stream-film']");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: ResolverConfig =
            serde_json::from_str(r#"{"retry": {"max_attempts": 5}, "site": {"player_id": "mx"}}"#)
                .unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay_ms, 200);
        assert_eq!(config.site.player_id, "mx");
        assert_eq!(config.site.series_frame_marker, "streaming-serie-tv");
    }
}

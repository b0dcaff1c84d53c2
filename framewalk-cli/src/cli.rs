use std::path::PathBuf;

use clap::Parser;

/// Resolve and download HLS streams from onlineserietv movie and series pages.
#[derive(Parser, Debug)]
#[command(name = "framewalk", author, version, about, long_about = None)]
pub struct Args {
    /// Movie or series page URL
    #[arg(value_name = "URL", required_unless_present_any = ["link", "m3u8"])]
    pub url: Option<String>,

    /// Movie or series page URL (alternative to the positional argument)
    #[arg(short, long, conflicts_with = "url")]
    pub link: Option<String>,

    /// HLS manifest to save directly, without opening any page
    #[arg(short, long, value_name = "URL", conflicts_with_all = ["url", "link"])]
    pub m3u8: Option<String>,

    /// Output file name (without extension) for `--m3u8`
    #[arg(short, long, requires = "m3u8", default_value = "video")]
    pub name: String,

    /// Seasons to download: `all`, `N`, `N-M` or a comma separated list
    #[arg(short, long, default_value = "all")]
    pub seasons: String,

    /// Episodes to download within each selected season, same grammar
    #[arg(short, long)]
    pub episodes: Option<String>,

    /// Output directory
    #[arg(short, long = "outdir", env = "FRAMEWALK_OUTDIR")]
    pub output_dir: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, env = "FRAMEWALK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Attempts per page before giving up
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Pause between items in seconds (random jitter is added on top)
    #[arg(long, value_name = "SECS", value_parser = parse_delay)]
    pub delay: Option<f64>,

    /// Run the browser without a window
    #[arg(long, overrides_with = "no_headless")]
    pub headless: bool,

    /// Show the browser window
    #[arg(long, overrides_with = "headless")]
    pub no_headless: bool,

    /// Chrome/Chromium executable
    #[arg(long, env = "CHROME")]
    pub chrome: Option<PathBuf>,

    /// Directory for screenshots of pages that could not be resolved
    #[arg(long)]
    pub debug_dir: Option<PathBuf>,

    /// ffmpeg binary (defaults to the one on PATH)
    #[arg(long, env = "FFMPEG")]
    pub ffmpeg: Option<PathBuf>,

    /// ffprobe binary (defaults to the one on PATH)
    #[arg(long, env = "FFPROBE")]
    pub ffprobe: Option<PathBuf>,

    /// Also write daily rotated log files to this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    pub fn content_url(&self) -> &str {
        self.url
            .as_deref()
            .or(self.link.as_deref())
            .unwrap_or_default()
    }

    /// `Some` when one of `--headless`/`--no-headless` was given; the last one wins.
    pub fn headless(&self) -> Option<bool> {
        match (self.headless, self.no_headless) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

fn parse_delay(value: &str) -> Result<f64, String> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid number of seconds: {e}"))?;
    if secs.is_finite() && secs >= 0.0 {
        Ok(secs)
    } else {
        Err(format!("delay must be a finite, non-negative number of seconds, got {value}"))
    }
}

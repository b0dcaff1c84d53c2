use std::path::{Path, PathBuf};

use anyhow::Context;
use framewalk::ResolverConfig;
use serde::{Deserialize, Serialize};

use crate::cli::Args;

const CONFIG_FILE: &str = "config.toml";

/// Chromium launch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    /// Chrome/Chromium executable; auto-detected when unset.
    pub executable: Option<PathBuf>,
    pub window_width: u32,
    pub window_height: u32,
    /// Polling interval of element and frame waits, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            window_width: 1280,
            window_height: 720,
            poll_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub output_dir: PathBuf,
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
    pub browser: BrowserSettings,
    pub resolver: ResolverConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("Downloads"),
            ffmpeg: None,
            ffprobe: None,
            browser: BrowserSettings::default(),
            resolver: ResolverConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads `path`, else the user configuration file, else the defaults.
    ///
    /// An explicit path must exist; the user file is optional.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("framewalk").join(CONFIG_FILE))
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Command-line values take precedence over the file.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(dir) = &args.output_dir {
            self.output_dir = dir.clone();
        }
        if let Some(max_retries) = args.max_retries {
            self.resolver.retry = self.resolver.retry.clone().with_max_attempts(max_retries);
        }
        if let Some(delay) = args.delay {
            self.resolver.pacing.delay_secs = delay.max(0.0);
        }
        if let Some(headless) = args.headless() {
            self.browser.headless = headless;
        }
        if let Some(chrome) = &args.chrome {
            self.browser.executable = Some(chrome.clone());
        }
        if let Some(dir) = &args.debug_dir {
            self.resolver.debug_dir = dir.clone();
        }
        if let Some(ffmpeg) = &args.ffmpeg {
            self.ffmpeg = Some(ffmpeg.clone());
        }
        if let Some(ffprobe) = &args.ffprobe {
            self.ffprobe = Some(ffprobe.clone());
        }
    }
}

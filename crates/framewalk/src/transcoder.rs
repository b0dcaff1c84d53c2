//! Media transcoder collaborator: turns a manifest URL into an MP4 file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::content::ManifestUrl;
use crate::error::TranscodeError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(20);

/// One manifest to copy into a local file.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub manifest: ManifestUrl,
    pub output: PathBuf,
    pub referer: String,
    pub user_agent: String,
}

impl TranscodeRequest {
    pub fn new(manifest: ManifestUrl, output: impl Into<PathBuf>) -> Self {
        Self {
            manifest,
            output: output.into(),
            referer: String::new(),
            user_agent: String::new(),
        }
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = referer.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// `Referer`/`Origin` header block in ffmpeg's `-headers` format.
    fn header_block(&self) -> Option<String> {
        if self.referer.is_empty() {
            return None;
        }
        let origin = self.referer.trim_end_matches('/');
        Some(format!("Referer: {}\r\nOrigin: {origin}\r\n", self.referer))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranscodeEvent {
    Started {
        output: PathBuf,
        total_secs: Option<f64>,
    },
    Progress {
        out_time_secs: f64,
        total_secs: Option<f64>,
    },
    Finished {
        output: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Completed,
    /// The output file already existed.
    Skipped,
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Copies `request.manifest` into `request.output`, reporting progress on
    /// `events`. An existing output file is left alone.
    async fn transcode(
        &self,
        request: &TranscodeRequest,
        events: mpsc::Sender<TranscodeEvent>,
        cancel: &CancellationToken,
    ) -> Result<TranscodeOutcome, TranscodeError>;
}

/// ffmpeg-backed transcoder with optional ffprobe duration lookup.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: Option<PathBuf>,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: Option<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe,
        }
    }

    /// Uses the given binaries, falling back to `ffmpeg`/`ffprobe` on `PATH`.
    /// Only ffmpeg is mandatory.
    pub fn discover(
        ffmpeg: Option<PathBuf>,
        ffprobe: Option<PathBuf>,
    ) -> Result<Self, TranscodeError> {
        let ffmpeg = ffmpeg
            .or_else(|| find_in_path("ffmpeg"))
            .ok_or_else(|| TranscodeError::Spawn {
                program: "ffmpeg".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found in PATH"),
            })?;
        let ffprobe = ffprobe.or_else(|| find_in_path("ffprobe"));
        if ffprobe.is_none() {
            warn!("ffprobe not found, progress will not show totals");
        }
        debug!(ffmpeg = %ffmpeg.display(), ffprobe = ?ffprobe, "Transcoder binaries");
        Ok(Self::new(ffmpeg, ffprobe))
    }

    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }

    fn build_args(&self, request: &TranscodeRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-y", "-hide_banner", "-nostats"]
            .into_iter()
            .map(OsString::from)
            .collect();

        if !request.user_agent.is_empty() {
            args.extend(["-user_agent".into(), request.user_agent.clone().into()]);
        }
        if let Some(headers) = request.header_block() {
            args.extend(["-headers".into(), headers.into()]);
        }
        args.extend(["-i".into(), request.manifest.as_str().into()]);
        args.extend(
            [
                "-c",
                "copy",
                "-bsf:a",
                "aac_adtstoasc",
                "-progress",
                "pipe:1",
                "-loglevel",
                "error",
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.push(request.output.clone().into_os_string());
        args
    }

    /// Total duration of the stream in seconds, if ffprobe can tell.
    async fn stream_duration(&self, request: &TranscodeRequest) -> Option<f64> {
        let ffprobe = self.ffprobe.as_ref()?;
        let mut command = Command::new(ffprobe);
        command.args(["-v", "error"]);
        if !request.user_agent.is_empty() {
            command.args(["-user_agent", &request.user_agent]);
        }
        if let Some(headers) = request.header_block() {
            command.arg("-headers").arg(headers);
        }
        command
            .args([
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(request.manifest.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(PROBE_TIMEOUT, command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                parse_duration(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(Ok(output)) => {
                debug!(status = %output.status, "ffprobe failed");
                None
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Failed to run ffprobe");
                None
            }
            Err(_) => {
                debug!("ffprobe timed out");
                None
            }
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        request: &TranscodeRequest,
        events: mpsc::Sender<TranscodeEvent>,
        cancel: &CancellationToken,
    ) -> Result<TranscodeOutcome, TranscodeError> {
        let output = &request.output;
        if tokio::fs::try_exists(output).await.unwrap_or(false) {
            info!(output = %output.display(), "Output exists, skipping");
            return Ok(TranscodeOutcome::Skipped);
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let total_secs = self.stream_duration(request).await;
        let args = self.build_args(request);
        info!(output = %output.display(), total_secs = ?total_secs, "Starting ffmpeg");
        debug!(?args, "ffmpeg arguments");

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::Spawn {
                program: self.ffmpeg.display().to_string(),
                source,
            })?;

        let _ = events
            .send(TranscodeEvent::Started {
                output: output.clone(),
                total_secs,
            })
            .await;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("ffmpeg: {line}");
                }
            });
        }
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TranscodeError::Io(std::io::Error::other("ffmpeg stdout not captured")))?;

        let finished = tokio::select! {
            _ = cancel.cancelled() => None,
            status = async {
                pump_progress(BufReader::new(stdout), total_secs, &events).await;
                child.wait().await
            } => Some(status),
        };

        let Some(status) = finished else {
            info!(output = %output.display(), "Transcode cancelled");
            let _ = child.kill().await;
            remove_partial(output).await;
            return Err(TranscodeError::Cancelled);
        };

        let status = status?;
        if !status.success() {
            remove_partial(output).await;
            return Err(TranscodeError::Exited {
                status: status.to_string(),
            });
        }

        let _ = events
            .send(TranscodeEvent::Finished {
                output: output.clone(),
            })
            .await;
        info!(output = %output.display(), "Transcode completed");
        Ok(TranscodeOutcome::Completed)
    }
}

/// Forwards `-progress pipe:1` updates until the stream ends.
async fn pump_progress<R>(reader: R, total_secs: Option<f64>, events: &mpsc::Sender<TranscodeEvent>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(out_time_secs) = parse_progress_line(&line) {
                    let _ = events
                        .send(TranscodeEvent::Progress {
                            out_time_secs,
                            total_secs,
                        })
                        .await;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Error reading ffmpeg progress");
                break;
            }
        }
    }
}

/// Parses an `out_time_us=` or `out_time_ms=` progress line into seconds.
/// Both keys carry microseconds.
fn parse_progress_line(line: &str) -> Option<f64> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" | "out_time_ms" => {
            let micros: i64 = value.trim().parse().ok()?;
            Some(micros.max(0) as f64 / 1_000_000.0)
        }
        _ => None,
    }
}

fn parse_duration(output: &str) -> Option<f64> {
    output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

async fn remove_partial(output: &Path) {
    match tokio::fs::remove_file(output).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            warn!(output = %output.display(), error = %e, "Failed to remove partial output");
        }
        _ => {}
    }
}

fn find_in_path(program: &str) -> Option<PathBuf> {
    let names: Vec<String> = if cfg!(windows) {
        vec![format!("{program}.exe"), program.to_string()]
    } else {
        vec![program.to_string()]
    };
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

mod browser;
mod cli;
mod config;
mod logging;
mod output;
mod progress;

use std::process;

use anyhow::Context;
use clap::Parser;
use framewalk::{ContentRef, FfmpegTranscoder, ManifestUrl, Pipeline, RunReport, SelectionSpec};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{browser::ChromiumSession, cli::Args, config::AppConfig, logging::init_logging};

const EXIT_FAILURE: i32 = 1;
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    match run(args).await {
        Ok(0) => {}
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("Application error: {:#}", e);
            eprintln!("Error: {e:#}");
            process::exit(EXIT_FAILURE);
        }
    }
}

async fn run(args: Args) -> anyhow::Result<i32> {
    let _guard = init_logging(args.verbose, args.quiet, args.log_dir.as_deref())
        .context("Failed to initialise logging")?;

    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_args(&args);
    debug!(?config, "Loaded configuration");

    let transcoder = FfmpegTranscoder::discover(config.ffmpeg.clone(), config.ffprobe.clone())
        .context("ffmpeg is required to save streams")?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after cleanup");
                cancel.cancel();
            }
        }
    });

    let (events_tx, events_rx) = mpsc::channel(64);
    let progress = progress::spawn(events_rx, args.quiet);
    let pipeline = Pipeline::new(&config.resolver, &transcoder, &config.output_dir, cancel)
        .with_events(events_tx);

    let report = match &args.m3u8 {
        Some(manifest) => {
            info!(url = %manifest, "Starting framewalk");
            pipeline
                .download_manifest(ManifestUrl::new(manifest.as_str()), &args.name)
                .await
        }
        None => resolve_page(&args, &config, &pipeline).await?,
    };
    drop(pipeline);

    if let Err(e) = progress.await {
        debug!(error = %e, "Progress display task ended abnormally");
    }

    if !args.quiet {
        output::print_report(&report);
    }
    info!(%report, "Finished");

    Ok(if report.cancelled {
        EXIT_INTERRUPTED
    } else if report.is_failure() {
        EXIT_FAILURE
    } else {
        0
    })
}

async fn resolve_page(
    args: &Args,
    config: &AppConfig,
    pipeline: &Pipeline<'_>,
) -> anyhow::Result<RunReport> {
    let content = ContentRef::from_url(
        args.content_url(),
        &config.resolver.site.series_path_marker,
    );
    let seasons = SelectionSpec::parse(Some(&args.seasons));
    let episodes = SelectionSpec::parse(args.episodes.as_deref());
    info!(kind = %content.kind, url = %content.url, "Starting framewalk");

    let mut session = ChromiumSession::launch(&config.browser, &config.resolver.site.user_agent)
        .await
        .context("Failed to start the browser")?;
    let report = pipeline
        .run(&mut session, &content, &seasons, &episodes)
        .await;
    session.close().await;
    Ok(report)
}

use std::time::Duration;

use framewalk::TranscodeEvent;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const BAR_TEMPLATE: &str =
    "{spinner:.blue} {msg} [{bar:40.cyan/blue}] {pos}/{len}s ({elapsed_precise}, eta {eta})";
const SPINNER_TEMPLATE: &str = "{spinner:.blue} {msg} {pos}s ({elapsed_precise})";

/// Renders transcoder events until the sending side is dropped.
pub fn spawn(mut events: mpsc::Receiver<TranscodeEvent>, hidden: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut bar: Option<ProgressBar> = None;
        while let Some(event) = events.recv().await {
            match event {
                TranscodeEvent::Started { output, total_secs } => {
                    let name = output
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let pb = new_bar(total_secs, hidden);
                    pb.set_message(name);
                    if let Some(previous) = bar.replace(pb) {
                        previous.abandon();
                    }
                }
                TranscodeEvent::Progress {
                    out_time_secs,
                    total_secs,
                } => {
                    if let Some(pb) = &bar {
                        if let Some(total) = total_secs {
                            pb.set_length(total as u64);
                        }
                        pb.set_position(out_time_secs as u64);
                    }
                }
                TranscodeEvent::Finished { output } => {
                    if let Some(pb) = bar.take() {
                        pb.finish_with_message(format!("Saved {}", output.display()));
                    }
                }
            }
        }
        if let Some(pb) = bar.take() {
            pb.abandon();
        }
    })
}

fn new_bar(total_secs: Option<f64>, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }

    let (pb, template) = match total_secs {
        Some(total) => (ProgressBar::new(total as u64), BAR_TEMPLATE),
        None => (ProgressBar::new_spinner(), SPINNER_TEMPLATE),
    };
    pb.enable_steady_tick(Duration::from_millis(120));
    if let Ok(style) = ProgressStyle::with_template(template) {
        pb.set_style(
            style
                .progress_chars("=> ")
                .tick_strings(&["▹▹▹▹▹", "▸▹▹▹▹", "▹▸▹▹▹", "▹▹▸▹▹", "▹▹▹▸▹", "▹▹▹▹▸", "▪▪▪▪▪"]),
        );
    }
    pb
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[tokio::test]
    async fn drains_events_and_exits_when_sender_drops() {
        let (tx, rx) = mpsc::channel(8);
        let handle = spawn(rx, true);

        let output = PathBuf::from("Serie/Dark/S01/Dark - S01E01.mp4");
        tx.send(TranscodeEvent::Started {
            output: output.clone(),
            total_secs: Some(120.0),
        })
        .await
        .unwrap();
        tx.send(TranscodeEvent::Progress {
            out_time_secs: 60.0,
            total_secs: Some(120.0),
        })
        .await
        .unwrap();
        tx.send(TranscodeEvent::Finished { output }).await.unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

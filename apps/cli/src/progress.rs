use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;

use tikcomments_core::{BatchEvent, format_count};

use crate::report::status_line;

fn create_bar(total: usize, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// Drive the progress bar from batch events until the channel closes
pub async fn render(mut events: UnboundedReceiver<BatchEvent>, total: usize, quiet: bool) {
    let pb = create_bar(total, quiet);

    while let Some(event) = events.recv().await {
        match event {
            BatchEvent::Started { .. } => {}
            BatchEvent::VideoStarted { reference, .. } => {
                pb.set_message(format!("fetching {}", reference));
            }
            BatchEvent::PageFetched {
                pages, comments, ..
            } => {
                pb.set_message(format!(
                    "page {}, {} comments",
                    pages,
                    format_count(comments)
                ));
            }
            BatchEvent::VideoFinished { outcome, .. } => {
                pb.inc(1);
                pb.println(status_line(&outcome));
            }
        }
    }

    pb.finish_and_clear();
}

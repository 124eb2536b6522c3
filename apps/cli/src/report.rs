use std::{path::Path, time::Duration};

use console::style;

use tikcomments_core::{
    BatchReport, VideoOutcome, VideoStatus, format_count, format_duration,
};

/// One line per finished video
pub fn status_line(outcome: &VideoOutcome) -> String {
    let elapsed = format_duration(Duration::from_millis(outcome.elapsed_ms));
    let counts = format!(
        "{} comments, {} pages",
        format_count(outcome.comments),
        outcome.pages
    );

    match &outcome.status {
        VideoStatus::Success => format!(
            "{} {} {} {}",
            style("✓").green().bold(),
            outcome.reference,
            counts,
            style(elapsed).dim()
        ),
        VideoStatus::Truncated(reason) => format!(
            "{} {} {} {}",
            style("!").yellow().bold(),
            outcome.reference,
            counts,
            style(format!("({})", reason)).yellow()
        ),
        VideoStatus::Failed(message) => format!(
            "{} {} {}",
            style("✗").red().bold(),
            outcome.reference,
            style(message).red()
        ),
        VideoStatus::Cancelled => format!(
            "{} {} {}",
            style("-").dim(),
            outcome.reference,
            style("cancelled").dim()
        ),
        VideoStatus::Duplicate { of } => format!(
            "{} {} {}",
            style("=").dim(),
            outcome.reference,
            style(format!("same video as {}", of)).dim()
        ),
    }
}

pub fn print_summary(report: &BatchReport, summary_path: &Path) {
    let stats = &report.statistics;

    println!("\n{}", style("─".repeat(60)).dim());
    println!(
        "{} {} succeeded, {} truncated, {} failed, {} cancelled, {} duplicate",
        style("Videos:").bold(),
        report.count(|s| *s == VideoStatus::Success),
        report.count(|s| matches!(s, VideoStatus::Truncated(_))),
        report.count(VideoStatus::is_failed),
        report.count(|s| *s == VideoStatus::Cancelled),
        report.count(|s| matches!(s, VideoStatus::Duplicate { .. })),
    );
    println!(
        "{} {} from {} authors, {} likes",
        style("Comments:").bold(),
        format_count(stats.total_comments),
        format_count(stats.unique_authors as u64),
        format_count(stats.total_likes)
    );
    println!(
        "{} {:.2} per video",
        style("Average:").bold(),
        stats.average_comments_per_video
    );

    if let Some(top) = &stats.most_liked {
        println!(
            "{} {} {}",
            style("Most liked:").bold(),
            top.text,
            style(format!("({} likes, @{})", format_count(top.like_count), top.author)).dim()
        );
    }
    if let (Some(earliest), Some(latest)) = (stats.earliest_comment, stats.latest_comment) {
        println!(
            "{} {} .. {}",
            style("Span:").bold(),
            earliest.format("%Y-%m-%d %H:%M"),
            latest.format("%Y-%m-%d %H:%M")
        );
    }

    if !stats.failed_videos.is_empty() {
        println!("\n{}", style("Failed:").red().bold());
        for reference in &stats.failed_videos {
            println!("  {}", reference);
        }
    }

    let elapsed = (report.finished_at - report.started_at)
        .to_std()
        .unwrap_or_default();
    println!(
        "\n{} {} {}\n",
        style("Saved:").dim(),
        style(summary_path.display()).cyan(),
        style(format!("in {}", format_duration(elapsed))).dim()
    );
}

mod progress;
mod report;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::Parser;
use console::style;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use tikcomments_core::{
    AppConfig, BatchRunner, CommentFetcher, HttpCommentSource, JsonLinesSinkFactory,
    load_references,
};

#[derive(Parser, Debug)]
#[command(name = "tikcomments", version)]
#[command(about = "Download every comment of a list of TikTok videos")]
struct Cli {
    /// File with one video URL or id per line (`#` starts a comment)
    #[arg(default_value = "video_urls.txt")]
    input: PathBuf,

    /// Directory for the per-video JSON Lines files and summary.json
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of videos fetched concurrently
    #[arg(short, long)]
    workers: Option<usize>,

    /// Stop each video after this many pages
    #[arg(long)]
    max_pages: Option<u32>,

    /// Stop each video after this many comments (default 1000)
    #[arg(long)]
    max_comments: Option<usize>,

    /// Fetch every comment, without the per-video comment cap
    #[arg(long, conflicts_with = "max_comments")]
    all_comments: bool,

    /// Config file (defaults to ~/.config/tikcomments/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cookie header sent with every request
    #[arg(long, env = "TIKCOMMENTS_COOKIE", hide_env_values = true)]
    cookie: Option<String>,

    /// Debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors and hide the progress bar
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    /// Flags given on the command line win over the config file
    fn apply(&self, config: &mut AppConfig) {
        if let Some(output) = &self.output {
            config.batch.output_dir = output.clone();
        }
        if let Some(workers) = self.workers {
            config.batch.workers = workers;
        }
        if let Some(max_pages) = self.max_pages {
            config.fetch.max_pages = Some(max_pages);
        }
        if let Some(max_comments) = self.max_comments {
            config.fetch.max_comments = Some(max_comments);
        }
        if self.all_comments {
            config.fetch.max_comments = None;
        }
        if let Some(cookie) = &self.cookie {
            config.http.cookie = Some(cookie.clone());
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(verbose),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let mut config = AppConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    let references = load_references(&cli.input)
        .await
        .with_context(|| format!("Failed to read video list {}", cli.input.display()))?;
    if references.is_empty() {
        bail!("No video references found in {}", cli.input.display());
    }

    println!(
        "\n{}  {}\n",
        style("tikcomments").cyan().bold(),
        style(format!(
            "{} videos, {} workers",
            references.len(),
            config.batch.workers
        ))
        .dim()
    );

    let source = HttpCommentSource::new(config.http.clone(), config.fetch.page_size)
        .context("Failed to build HTTP client")?;
    let cancel = CancellationToken::new();
    let fetcher = CommentFetcher::new(Arc::new(source), config.fetch.clone())
        .with_cancellation(cancel.clone());

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let runner = BatchRunner::new(
        fetcher,
        Arc::new(JsonLinesSinkFactory::new(&config.batch.output_dir)),
        config.batch.clone(),
    )
    .with_events(events_tx);

    let progress = tokio::spawn(progress::render(events_rx, references.len(), cli.quiet));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping at the next page boundary");
            cancel.cancel();
        }
    });

    let report = runner.run(references).await;
    // Closes the event channel so the progress task can finish.
    drop(runner);
    let _ = progress.await;

    let summary = report.save(&config.batch.output_dir).await?;
    report::print_summary(&report, &summary);

    std::process::exit(report.exit_code());
}

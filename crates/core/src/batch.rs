//! Concurrent batch driver: one [`FetchSession`](crate::session::FetchSession)
//! per video, at most `workers` in flight, each writing to its own sink.

use std::{
    collections::{HashMap, hash_map::Entry},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    config::BatchConfig,
    error::Result,
    fetcher::CommentFetcher,
    output,
    sink::SinkFactory,
    stats::{BatchStatistics, StatsCollector},
    types::{Truncation, VideoId, VideoReference},
};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Success,
    Truncated(Truncation),
    Failed(String),
    Cancelled,
    /// Names the same video as an earlier reference; fetched only once.
    Duplicate { of: VideoReference },
}

impl VideoStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, VideoStatus::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoOutcome {
    pub reference: VideoReference,
    /// Absent when the reference never resolved to a video id
    pub video_id: Option<String>,
    pub status: VideoStatus,
    pub comments: u64,
    pub pages: u32,
    pub output_path: Option<PathBuf>,
    pub elapsed_ms: u64,
}

impl VideoOutcome {
    pub fn new(reference: VideoReference) -> Self {
        Self {
            reference,
            video_id: None,
            status: VideoStatus::Cancelled,
            comments: 0,
            pages: 0,
            output_path: None,
            elapsed_ms: 0,
        }
    }
}

/// Progress notifications, in the order they happen.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Started {
        run_id: Uuid,
        total: usize,
    },
    VideoStarted {
        index: usize,
        reference: VideoReference,
    },
    PageFetched {
        index: usize,
        pages: u32,
        comments: u64,
    },
    VideoFinished {
        index: usize,
        outcome: VideoOutcome,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    /// One entry per input reference, in input order
    pub videos: Vec<VideoOutcome>,
    pub statistics: BatchStatistics,
}

impl BatchReport {
    /// Process exit status for this run: `0` clean, `1` when any video
    /// failed, `130` when cancelled without failures.
    pub fn exit_code(&self) -> i32 {
        if self.videos.iter().any(|v| v.status.is_failed()) {
            EXIT_FAILED
        } else if self.cancelled || self.videos.iter().any(|v| v.status == VideoStatus::Cancelled)
        {
            EXIT_CANCELLED
        } else {
            EXIT_OK
        }
    }

    pub fn count(&self, predicate: impl Fn(&VideoStatus) -> bool) -> usize {
        self.videos.iter().filter(|v| predicate(&v.status)).count()
    }

    /// Write the report to `<output_dir>/summary.json`.
    pub async fn save(&self, output_dir: &Path) -> Result<PathBuf> {
        output::save_summary(self, output_dir).await
    }
}

pub struct BatchRunner {
    fetcher: CommentFetcher,
    sinks: Arc<dyn SinkFactory>,
    config: BatchConfig,
    events: Option<mpsc::UnboundedSender<BatchEvent>>,
}

impl BatchRunner {
    pub fn new(fetcher: CommentFetcher, sinks: Arc<dyn SinkFactory>, config: BatchConfig) -> Self {
        Self {
            fetcher,
            sinks,
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<BatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn fetcher(&self) -> &CommentFetcher {
        &self.fetcher
    }

    pub async fn run(&self, references: Vec<VideoReference>) -> BatchReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let workers = self.config.workers.max(1);

        info!(%run_id, videos = references.len(), workers, "Starting batch");
        self.emit(BatchEvent::Started {
            run_id,
            total: references.len(),
        });

        let (jobs, duplicates) = self.collapse_duplicates(references);

        let mut results: Vec<(usize, VideoOutcome, StatsCollector)> =
            stream::iter(jobs.into_iter().enumerate())
                .map(|(slot, (index, reference))| {
                    let span = info_span!("video", index, reference = %reference);
                    self.process(index, reference, slot >= workers)
                        .instrument(span)
                })
                .buffer_unordered(workers)
                .collect()
                .await;
        results.extend(
            duplicates
                .into_iter()
                .map(|(index, outcome)| (index, outcome, StatsCollector::new())),
        );
        results.sort_by_key(|(index, _, _)| *index);

        let mut collector = StatsCollector::new();
        let mut videos = Vec::with_capacity(results.len());
        for (_, outcome, stats) in results {
            collector.merge(stats);
            videos.push(outcome);
        }
        let statistics = collector.finish(&videos);
        let cancelled = self.fetcher.cancellation().is_cancelled();

        info!(
            %run_id,
            comments = statistics.total_comments,
            failed = statistics.failed_videos.len(),
            cancelled,
            "Batch finished"
        );

        BatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            cancelled,
            videos,
            statistics,
        }
    }

    /// Split the input into references to fetch and later references that
    /// resolve to an already queued video. Both keep their input index.
    fn collapse_duplicates(
        &self,
        references: Vec<VideoReference>,
    ) -> (Vec<(usize, VideoReference)>, Vec<(usize, VideoOutcome)>) {
        let mut first_seen: HashMap<VideoId, VideoReference> = HashMap::new();
        let mut jobs = Vec::with_capacity(references.len());
        let mut duplicates = Vec::new();

        for (index, reference) in references.into_iter().enumerate() {
            // Invalid references still run so that they fail with their own message.
            let Ok(video_id) = crate::reference::resolve(&reference) else {
                jobs.push((index, reference));
                continue;
            };

            match first_seen.entry(video_id) {
                Entry::Occupied(entry) => {
                    warn!(
                        index,
                        reference = %reference,
                        first = %entry.get(),
                        "Skipping reference to an already queued video"
                    );
                    let outcome = VideoOutcome {
                        video_id: Some(entry.key().to_string()),
                        status: VideoStatus::Duplicate {
                            of: entry.get().clone(),
                        },
                        ..VideoOutcome::new(reference)
                    };
                    self.emit(BatchEvent::VideoFinished {
                        index,
                        outcome: outcome.clone(),
                    });
                    duplicates.push((index, outcome));
                }
                Entry::Vacant(entry) => {
                    entry.insert(reference.clone());
                    jobs.push((index, reference));
                }
            }
        }

        (jobs, duplicates)
    }

    async fn process(
        &self,
        index: usize,
        reference: VideoReference,
        delayed: bool,
    ) -> (usize, VideoOutcome, StatsCollector) {
        let mut stats = StatsCollector::new();
        let mut outcome = VideoOutcome::new(reference.clone());

        if delayed && !self.politeness_delay().await {
            return (index, outcome, stats);
        }
        if self.fetcher.cancellation().is_cancelled() {
            return (index, outcome, stats);
        }

        self.emit(BatchEvent::VideoStarted {
            index,
            reference: reference.clone(),
        });
        let started = Instant::now();
        self.fetch_video(index, &reference, &mut outcome, &mut stats)
            .await;
        outcome.elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome.status {
            VideoStatus::Success => {
                info!(comments = outcome.comments, pages = outcome.pages, "Video done")
            }
            VideoStatus::Truncated(reason) => {
                warn!(comments = outcome.comments, %reason, "Video truncated")
            }
            VideoStatus::Failed(message) => error!(comments = outcome.comments, "{}", message),
            VideoStatus::Cancelled => info!(comments = outcome.comments, "Video cancelled"),
            VideoStatus::Duplicate { .. } => {}
        }

        self.emit(BatchEvent::VideoFinished {
            index,
            outcome: outcome.clone(),
        });
        (index, outcome, stats)
    }

    async fn fetch_video(
        &self,
        index: usize,
        reference: &VideoReference,
        outcome: &mut VideoOutcome,
        stats: &mut StatsCollector,
    ) {
        let mut session = match self.fetcher.fetch_all(reference) {
            Ok(session) => session,
            Err(e) => {
                outcome.status = VideoStatus::Failed(e.to_string());
                return;
            }
        };
        outcome.video_id = Some(session.video_id().to_string());

        let mut sink = match self.sinks.open(session.video_id()).await {
            Ok(sink) => sink,
            Err(e) => {
                outcome.status = VideoStatus::Failed(e.to_string());
                return;
            }
        };
        outcome.output_path = sink.location().map(Path::to_path_buf);

        let mut reported_pages = 0;
        let result = loop {
            let done = match session.next_record().await {
                Ok(Some(record)) => match sink.append(&record).await {
                    Ok(()) => {
                        stats.observe(&record);
                        outcome.comments += 1;
                        None
                    }
                    Err(e) => Some(Err(e)),
                },
                Ok(None) => Some(Ok(())),
                Err(e) => Some(Err(e)),
            };

            // Pages without new records still count as progress.
            let pages = session.stats().pages;
            if pages != reported_pages {
                reported_pages = pages;
                self.emit(BatchEvent::PageFetched {
                    index,
                    pages,
                    comments: outcome.comments,
                });
            }

            if let Some(result) = done {
                break result;
            }
        };

        // Records written so far stay valid whatever happened to the session.
        let finished = sink.finish().await;
        outcome.pages = session.stats().pages;

        outcome.status = match (result, finished) {
            (Err(e), _) if e.is_cancelled() => VideoStatus::Cancelled,
            (Err(e), _) | (Ok(()), Err(e)) => VideoStatus::Failed(e.to_string()),
            (Ok(()), Ok(())) => match session.truncation() {
                Some(reason) => VideoStatus::Truncated(reason),
                None => VideoStatus::Success,
            },
        };
    }

    /// Sleep a random time from the configured range. Returns `false` when
    /// the batch was cancelled meanwhile.
    async fn politeness_delay(&self) -> bool {
        let min = self.config.video_delay_min_ms;
        let max = self.config.video_delay_max_ms.max(min);
        if max == 0 {
            return true;
        }

        let delay = Duration::from_millis(rand::rng().random_range(min..=max));
        let cancel = self.fetcher.cancellation().clone();
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn emit(&self, event: BatchEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        config::FetchConfig,
        error::SourceError,
        sink::JsonLinesSinkFactory,
        testing::{MemorySinkFactory, ScriptedSource, comment, cursor, page},
        types::{CommentRecord, ListingResponse},
    };

    const A: &str = "7301234567890000001";
    const B: &str = "7301234567890000002";
    const C: &str = "7301234567890000003";

    fn fetch_config() -> FetchConfig {
        let mut config = FetchConfig::default();
        config.rate_limit.base_delay_ms = 1;
        config.rate_limit.max_delay_ms = 4;
        config.retry.delay_step_ms = 1;
        config
    }

    fn batch_config(workers: usize) -> BatchConfig {
        BatchConfig {
            workers,
            video_delay_min_ms: 0,
            video_delay_max_ms: 0,
            ..BatchConfig::default()
        }
    }

    fn runner(
        source: &Arc<ScriptedSource>,
        sinks: &MemorySinkFactory,
        fetch: FetchConfig,
        workers: usize,
    ) -> BatchRunner {
        let fetcher = CommentFetcher::new(source.clone(), fetch);
        BatchRunner::new(fetcher, Arc::new(sinks.clone()), batch_config(workers))
    }

    fn refs(raw: &[&str]) -> Vec<VideoReference> {
        raw.iter().map(|r| VideoReference::new(*r)).collect()
    }

    #[tokio::test]
    async fn test_failures_stay_with_their_video() {
        let source = Arc::new(ScriptedSource::new());
        source.push_pages(A, &[3, 2]);
        source.push(
            C,
            Err(SourceError::Rejected {
                status_code: 5,
                message: "private video".to_string(),
            }),
        );
        let sinks = MemorySinkFactory::new();
        let runner = runner(&source, &sinks, fetch_config(), 2);

        let report = runner.run(refs(&[A, "not a video", C])).await;

        assert_eq!(report.videos.len(), 3);
        assert_eq!(report.videos[0].reference.as_str(), A);
        assert_eq!(report.videos[0].status, VideoStatus::Success);
        assert_eq!(report.videos[0].comments, 5);
        assert_eq!(report.videos[0].pages, 2);

        assert!(report.videos[1].status.is_failed());
        assert_eq!(report.videos[1].video_id, None);

        assert!(report.videos[2].status.is_failed());
        assert_eq!(report.videos[2].video_id.as_deref(), Some(C));
        assert!(sinks.is_finished(C));

        assert_eq!(sinks.records(A).len(), 5);
        assert_eq!(report.statistics.total_comments, 5);
        assert_eq!(report.statistics.failed_videos, ["not a video", C]);
        assert_eq!(report.exit_code(), EXIT_FAILED);
    }

    #[tokio::test]
    async fn test_partial_records_survive_failure() {
        let source = Arc::new(ScriptedSource::new());
        source.push(
            A,
            Ok(page(vec![comment(A, "1"), comment(A, "2")], cursor("c1"))),
        );
        source.push(A, Err(SourceError::Malformed("captcha page".to_string())));
        let sinks = MemorySinkFactory::new();

        let report = runner(&source, &sinks, fetch_config(), 1)
            .run(refs(&[A]))
            .await;

        assert!(report.videos[0].status.is_failed());
        assert_eq!(report.videos[0].comments, 2);
        assert_eq!(sinks.records(A).len(), 2);
        assert!(sinks.is_finished(A));
    }

    #[tokio::test]
    async fn test_truncation_is_not_a_failure() {
        let source = Arc::new(ScriptedSource::new());
        source.push_pages(A, &[50, 50, 10]);
        let sinks = MemorySinkFactory::new();
        let fetch = FetchConfig {
            max_comments: Some(60),
            ..fetch_config()
        };

        let report = runner(&source, &sinks, fetch, 1).run(refs(&[A])).await;

        assert_eq!(
            report.videos[0].status,
            VideoStatus::Truncated(Truncation::MaxComments { comments: 60 })
        );
        assert_eq!(sinks.records(A).len(), 60);
        assert_eq!(report.exit_code(), EXIT_OK);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let source = Arc::new(ScriptedSource::new());
        source.push_pages(A, &[1]);
        source.push_pages(B, &[1]);
        let sinks = MemorySinkFactory::new();

        let cancel = CancellationToken::new();
        let fetcher = CommentFetcher::new(source.clone(), fetch_config())
            .with_cancellation(cancel.clone());
        let runner = BatchRunner::new(fetcher, Arc::new(sinks.clone()), batch_config(1));
        cancel.cancel();

        let report = runner.run(refs(&[A, B])).await;

        assert!(report.cancelled);
        assert_eq!(report.count(|s| *s == VideoStatus::Cancelled), 2);
        assert!(source.calls().is_empty());
        assert_eq!(sinks.opened(), 0);
        assert_eq!(report.exit_code(), EXIT_CANCELLED);
    }

    #[tokio::test]
    async fn test_events_follow_progress() {
        let source = Arc::new(ScriptedSource::new());
        source.push_pages(A, &[2, 1]);
        let sinks = MemorySinkFactory::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let report = runner(&source, &sinks, fetch_config(), 1)
            .with_events(tx)
            .run(refs(&[A]))
            .await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert!(matches!(
            events.first(),
            Some(BatchEvent::Started { total: 1, run_id }) if *run_id == report.run_id
        ));
        assert!(matches!(
            events.get(1),
            Some(BatchEvent::VideoStarted { index: 0, .. })
        ));
        let pages: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::PageFetched { pages, .. } => Some(*pages),
                _ => None,
            })
            .collect();
        assert_eq!(pages, [1, 2]);
        assert!(matches!(
            events.last(),
            Some(BatchEvent::VideoFinished { index: 0, outcome }) if outcome.comments == 3
        ));
    }

    #[tokio::test]
    async fn test_shared_rate_limit_across_videos() {
        let source = Arc::new(ScriptedSource::new());
        source.push(A, Ok(ListingResponse::RateLimited));
        source.push_pages(A, &[1]);
        source.push_pages(B, &[1]);
        let sinks = MemorySinkFactory::new();
        let runner = runner(&source, &sinks, fetch_config(), 2);

        let report = runner.run(refs(&[A, B])).await;

        assert_eq!(report.count(|s| *s == VideoStatus::Success), 2);
        assert_eq!(runner.fetcher().rate_limit().total(), 1);
    }

    #[tokio::test]
    async fn test_writes_files_and_summary() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("comments");

        let source = Arc::new(ScriptedSource::new());
        source.push_pages(A, &[2]);
        let fetcher = CommentFetcher::new(source.clone(), fetch_config());
        let runner = BatchRunner::new(
            fetcher,
            Arc::new(JsonLinesSinkFactory::new(&dir)),
            batch_config(1),
        );

        let report = runner.run(refs(&[A])).await;
        let summary = report.save(&dir).await.unwrap();

        let jsonl = dir.join(format!("{}.jsonl", A));
        assert_eq!(report.videos[0].output_path.as_deref(), Some(jsonl.as_path()));
        let records: Vec<CommentRecord> = std::fs::read_to_string(&jsonl)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);

        let saved: BatchReport =
            serde_json::from_str(&std::fs::read_to_string(summary).unwrap()).unwrap();
        assert_eq!(saved.run_id, report.run_id);
        assert_eq!(saved.videos, report.videos);
    }

    #[tokio::test]
    async fn test_same_video_twice_is_fetched_once() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("comments");

        let source = Arc::new(ScriptedSource::new());
        source.push_pages(A, &[200]);
        source.push_pages(A, &[1]);
        let fetcher = CommentFetcher::new(source.clone(), fetch_config());
        let runner = BatchRunner::new(
            fetcher,
            Arc::new(JsonLinesSinkFactory::new(&dir)),
            batch_config(2),
        );

        let url = format!("https://www.tiktok.com/@u/video/{}", A);
        let report = runner.run(refs(&[A, url.as_str()])).await;

        assert_eq!(source.calls_for(A), 1);
        assert_eq!(report.videos[0].status, VideoStatus::Success);
        assert_eq!(report.videos[0].comments, 200);
        assert_eq!(
            report.videos[1].status,
            VideoStatus::Duplicate {
                of: VideoReference::new(A)
            }
        );
        assert_eq!(report.videos[1].video_id.as_deref(), Some(A));
        assert_eq!(report.statistics.total_comments, 200);
        assert_eq!(report.exit_code(), EXIT_OK);

        let lines = std::fs::read_to_string(dir.join(format!("{}.jsonl", A)))
            .unwrap()
            .lines()
            .count();
        assert_eq!(lines, 200);
    }

    /// Counts how many `list_comments` calls overlap.
    #[derive(Default)]
    struct ConcurrencyTracker {
        in_flight: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl crate::source::CommentSource for ConcurrencyTracker {
        fn name(&self) -> &str {
            "tracker"
        }

        async fn list_comments(
            &self,
            video_id: &VideoId,
            _cursor: Option<&crate::types::PageCursor>,
        ) -> std::result::Result<ListingResponse, SourceError> {
            use std::sync::atomic::Ordering;

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            Ok(page(vec![comment(video_id.as_str(), "1")], None))
        }
    }

    #[tokio::test]
    async fn test_at_most_workers_videos_in_flight() {
        let source = Arc::new(ConcurrencyTracker::default());
        let fetcher = CommentFetcher::new(source.clone(), fetch_config());
        let runner = BatchRunner::new(
            fetcher,
            Arc::new(MemorySinkFactory::new()),
            batch_config(2),
        );

        let ids: Vec<String> = (1..=5).map(|n| format!("730123456789000000{}", n)).collect();
        let references: Vec<VideoReference> =
            ids.iter().map(|id| VideoReference::new(id.as_str())).collect();
        let report = runner.run(references).await;

        assert_eq!(report.count(|s| *s == VideoStatus::Success), 5);
        assert_eq!(source.peak.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pages_without_new_records_report_progress() {
        let source = Arc::new(ScriptedSource::new());
        source.push(
            A,
            Ok(page(vec![comment(A, "a"), comment(A, "b")], cursor("c1"))),
        );
        source.push(A, Ok(page(Vec::new(), cursor("c2"))));
        source.push(
            A,
            Ok(page(vec![comment(A, "a"), comment(A, "b")], None)),
        );
        let sinks = MemorySinkFactory::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        runner(&source, &sinks, fetch_config(), 1)
            .with_events(tx)
            .run(refs(&[A]))
            .await;

        let mut pages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let BatchEvent::PageFetched { pages: n, comments, .. } = event {
                pages.push((n, comments));
            }
        }
        // The empty page and the all-duplicate page are pulled in one step.
        assert_eq!(pages, [(1, 1), (3, 2)]);
    }

    #[test]
    fn test_exit_codes() {
        let outcome = |status| VideoOutcome {
            status,
            ..VideoOutcome::new(VideoReference::new(A))
        };
        let report = |videos, cancelled| BatchReport {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            cancelled,
            videos,
            statistics: BatchStatistics::default(),
        };

        assert_eq!(report(vec![outcome(VideoStatus::Success)], false).exit_code(), 0);
        assert_eq!(
            report(
                vec![outcome(VideoStatus::Success), outcome(VideoStatus::Cancelled)],
                true
            )
            .exit_code(),
            130
        );
        assert_eq!(
            report(
                vec![
                    outcome(VideoStatus::Failed("x".into())),
                    outcome(VideoStatus::Cancelled)
                ],
                true
            )
            .exit_code(),
            1
        );
        assert_eq!(report(Vec::new(), false).exit_code(), 0);
    }
}

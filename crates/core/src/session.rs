//! Per-video pagination state machine.
//!
//! ```text
//! Idle -> Requesting -> Paginating  -> Requesting ...
//!                    -> RateLimited -> Requesting (after backoff)
//!                    -> Exhausted   (terminal)
//!                    -> Failed      (terminal)
//!                    -> Cancelled   (terminal)
//! ```

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use futures::Stream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::FetchConfig,
    error::{FetchError, Result, SourceError},
    rate_limit::RateLimitState,
    source::CommentSource,
    types::{CommentPage, CommentRecord, ListingResponse, PageCursor, Truncation, VideoId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Requesting,
    Paginating,
    RateLimited,
    Exhausted,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Exhausted | SessionState::Failed | SessionState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Successful page responses.
    pub pages: u32,
    /// Records handed to the consumer.
    pub emitted: usize,
    pub duplicates: usize,
    pub rate_limit_hits: u32,
    pub retries: u32,
}

/// Lazy sequence of the comments of one video.
///
/// Pages are requested only when the consumer has drained the records of the
/// previous page, strictly in cursor order.
pub struct FetchSession {
    video_id: VideoId,
    source: Arc<dyn CommentSource>,
    config: Arc<FetchConfig>,
    limits: Arc<RateLimitState>,
    cancel: CancellationToken,

    state: SessionState,
    cursor: Option<PageCursor>,
    requested_cursors: HashSet<PageCursor>,
    seen_ids: HashSet<String>,
    buffer: VecDeque<CommentRecord>,
    consecutive_limits: u32,
    /// Last rate-limit delay since the previous successful page.
    last_backoff: Duration,
    transport_failures: u32,
    truncation: Option<Truncation>,
    stats: SessionStats,
}

impl FetchSession {
    pub(crate) fn new(
        video_id: VideoId,
        source: Arc<dyn CommentSource>,
        config: Arc<FetchConfig>,
        limits: Arc<RateLimitState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            video_id,
            source,
            config,
            limits,
            cancel,
            state: SessionState::Idle,
            cursor: None,
            requested_cursors: HashSet::new(),
            seen_ids: HashSet::new(),
            buffer: VecDeque::new(),
            consecutive_limits: 0,
            last_backoff: Duration::ZERO,
            transport_failures: 0,
            truncation: None,
            stats: SessionStats::default(),
        }
    }

    pub fn video_id(&self) -> &VideoId {
        &self.video_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Set once the session stopped early; the records emitted so far stay valid.
    pub fn truncation(&self) -> Option<Truncation> {
        self.truncation
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Next unseen comment, fetching further pages as needed.
    ///
    /// `Ok(None)` once the listing is exhausted (or after the session failed).
    pub async fn next_record(&mut self) -> Result<Option<CommentRecord>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                self.stats.emitted += 1;
                return Ok(Some(record));
            }

            if self.state.is_terminal() {
                return Ok(None);
            }

            self.fetch_page().await?;
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<CommentRecord>> + Send {
        futures::stream::try_unfold(self, |mut session| async move {
            Ok(session
                .next_record()
                .await?
                .map(|record| (record, session)))
        })
    }

    async fn fetch_page(&mut self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(self.cancelled());
        }

        loop {
            self.wait_cooldown().await?;

            self.state = SessionState::Requesting;
            debug!(
                video_id = %self.video_id,
                cursor = ?self.cursor.as_ref().map(PageCursor::as_str),
                source = self.source.name(),
                "Requesting comment page"
            );

            let response = self
                .source
                .list_comments(&self.video_id, self.cursor.as_ref())
                .await;

            match response {
                Ok(ListingResponse::Page(page)) => {
                    self.limits.record_success();
                    self.consecutive_limits = 0;
                    self.last_backoff = Duration::ZERO;
                    self.transport_failures = 0;
                    self.accept_page(page);
                    return Ok(());
                }
                Ok(ListingResponse::RateLimited) => self.on_rate_limited().await?,
                Err(SourceError::Transport(reason)) => self.on_transport_error(reason).await?,
                Err(SourceError::Malformed(reason)) => {
                    return Err(self.fail(FetchError::MalformedResponse {
                        video_id: self.video_id.to_string(),
                        reason,
                    }));
                }
                Err(SourceError::Rejected {
                    status_code,
                    message,
                }) => {
                    return Err(self.fail(FetchError::Rejected {
                        video_id: self.video_id.to_string(),
                        status_code,
                        message,
                    }));
                }
            }
        }
    }

    async fn on_rate_limited(&mut self) -> Result<()> {
        self.state = SessionState::RateLimited;
        self.consecutive_limits += 1;
        self.stats.rate_limit_hits += 1;
        let shared_hits = self.limits.record_limit();

        let config = Arc::clone(&self.config);
        let policy = &config.rate_limit;
        if policy.is_exhausted(self.consecutive_limits) {
            return Err(self.fail(FetchError::RateLimitExceeded {
                video_id: self.video_id.to_string(),
                hits: self.consecutive_limits,
            }));
        }

        // Another session's success resets the shared count; never shrink our own delay.
        let delay = policy
            .delay_for(self.consecutive_limits.max(shared_hits))
            .max(self.last_backoff);
        self.last_backoff = delay;
        self.limits.extend_cooldown(delay);

        warn!(
            video_id = %self.video_id,
            hits = self.consecutive_limits,
            shared_hits,
            delay_ms = delay.as_millis() as u64,
            "Rate limited, backing off"
        );

        self.sleep(delay).await
    }

    async fn on_transport_error(&mut self, reason: String) -> Result<()> {
        self.transport_failures += 1;

        let config = Arc::clone(&self.config);
        let policy = &config.retry;
        if !policy.should_retry(self.transport_failures) {
            return Err(self.fail(FetchError::FetchFailed {
                video_id: self.video_id.to_string(),
                attempts: self.transport_failures,
                reason,
            }));
        }

        self.stats.retries += 1;
        let delay = policy.delay_for(self.transport_failures);

        warn!(
            video_id = %self.video_id,
            attempt = self.transport_failures,
            delay_ms = delay.as_millis() as u64,
            %reason,
            "Transport error, retrying"
        );

        self.sleep(delay).await
    }

    fn accept_page(&mut self, page: CommentPage) {
        self.stats.pages += 1;

        let received = page.comments.len();
        let mut dropped_by_limit = false;

        for record in page.comments {
            if self.seen_ids.contains(&record.id) {
                debug!(video_id = %self.video_id, comment_id = %record.id, "Dropping duplicate comment");
                self.stats.duplicates += 1;
                continue;
            }
            if self.at_comment_limit() {
                dropped_by_limit = true;
                break;
            }
            self.seen_ids.insert(record.id.clone());
            self.buffer.push_back(record);
        }

        debug!(
            video_id = %self.video_id,
            page = self.stats.pages,
            received,
            buffered = self.buffer.len(),
            has_next = page.next_cursor.is_some(),
            "Page received"
        );

        let Some(next) = page.next_cursor else {
            if dropped_by_limit {
                self.truncate(self.comment_limit_truncation());
            }
            self.exhaust();
            return;
        };

        if self.at_comment_limit() {
            self.truncate(self.comment_limit_truncation());
            self.exhaust();
        } else if let Some(max_pages) = self.config.max_pages.filter(|max| self.stats.pages >= *max)
        {
            self.truncate(Truncation::MaxPages { pages: max_pages });
            self.exhaust();
        } else if !self.requested_cursors.insert(next.clone()) {
            self.truncate(Truncation::CursorStalled);
            self.exhaust();
        } else {
            self.cursor = Some(next);
            self.state = SessionState::Paginating;
        }
    }

    fn at_comment_limit(&self) -> bool {
        self.config
            .max_comments
            .is_some_and(|max| self.seen_ids.len() >= max)
    }

    fn comment_limit_truncation(&self) -> Truncation {
        Truncation::MaxComments {
            comments: self.seen_ids.len(),
        }
    }

    fn truncate(&mut self, reason: Truncation) {
        warn!(video_id = %self.video_id, %reason, "Comment listing truncated");
        self.truncation = Some(reason);
    }

    fn exhaust(&mut self) {
        self.state = SessionState::Exhausted;
        info!(
            video_id = %self.video_id,
            pages = self.stats.pages,
            comments = self.seen_ids.len(),
            duplicates = self.stats.duplicates,
            "Comment listing finished"
        );
    }

    fn fail(&mut self, err: FetchError) -> FetchError {
        self.state = SessionState::Failed;
        err
    }

    fn cancelled(&mut self) -> FetchError {
        self.state = SessionState::Cancelled;
        FetchError::Cancelled {
            video_id: self.video_id.to_string(),
        }
    }

    async fn wait_cooldown(&mut self) -> Result<()> {
        let remaining = self.limits.cooldown_remaining();
        if !remaining.is_zero() {
            debug!(
                video_id = %self.video_id,
                remaining_ms = remaining.as_millis() as u64,
                "Waiting out shared rate-limit cooldown"
            );
        }
        self.sleep(remaining).await
    }

    async fn sleep(&mut self, delay: Duration) -> Result<()> {
        if delay.is_zero() {
            return Ok(());
        }

        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => Err(self.cancelled()),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

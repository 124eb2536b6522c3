use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    config::FetchConfig,
    error::Result,
    rate_limit::RateLimitState,
    reference,
    session::FetchSession,
    source::CommentSource,
    types::VideoReference,
};

/// Hands out one [`FetchSession`] per video, all sharing the same source,
/// rate-limit context and cancellation token.
#[derive(Clone)]
pub struct CommentFetcher {
    source: Arc<dyn CommentSource>,
    config: Arc<FetchConfig>,
    limits: Arc<RateLimitState>,
    cancel: CancellationToken,
}

impl CommentFetcher {
    pub fn new(source: Arc<dyn CommentSource>, config: FetchConfig) -> Self {
        Self {
            source,
            config: Arc::new(config),
            limits: Arc::new(RateLimitState::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_rate_limit(mut self, limits: Arc<RateLimitState>) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn rate_limit(&self) -> &Arc<RateLimitState> {
        &self.limits
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Start fetching every comment of `video`.
    ///
    /// The reference is validated up front; no request is made until the
    /// returned session is polled.
    pub fn fetch_all(&self, video: &VideoReference) -> Result<FetchSession> {
        let video_id = reference::resolve(video)?;

        Ok(FetchSession::new(
            video_id,
            Arc::clone(&self.source),
            Arc::clone(&self.config),
            Arc::clone(&self.limits),
            self.cancel.clone(),
        ))
    }
}

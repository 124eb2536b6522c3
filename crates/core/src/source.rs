use async_trait::async_trait;

use crate::{
    error::SourceError,
    types::{ListingResponse, PageCursor, VideoId},
};

/// The remote comment listing: one page of comments per call.
///
/// Implementations issue exactly one request per call and never retry on
/// their own; retries and backoff belong to the fetch session.
#[async_trait]
pub trait CommentSource: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Fetch the page at `cursor`, or the first page when `cursor` is `None`.
    async fn list_comments(
        &self,
        video_id: &VideoId,
        cursor: Option<&PageCursor>,
    ) -> Result<ListingResponse, SourceError>;
}

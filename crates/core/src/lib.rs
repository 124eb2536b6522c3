pub mod backoff;
pub mod batch;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod format;
pub mod http;
pub mod input;
pub mod output;
pub mod rate_limit;
pub mod reference;
pub mod session;
pub mod sink;
pub mod source;
pub mod stats;
pub mod types;

#[cfg(test)]
mod testing;

pub use backoff::{RateLimitPolicy, RetryPolicy};
pub use batch::{BatchEvent, BatchReport, BatchRunner, VideoOutcome, VideoStatus};
pub use config::{AppConfig, BatchConfig, FetchConfig, HttpConfig};
pub use error::{ConfigError, FetchError, Result, SourceError};
pub use fetcher::CommentFetcher;
pub use format::{format_count, format_duration, parse_count, truncate_text};
pub use http::HttpCommentSource;
pub use input::{load_references, parse_references};
pub use output::{save_summary, summary_path, video_output_path};
pub use rate_limit::RateLimitState;
pub use session::{FetchSession, SessionState, SessionStats};
pub use sink::{JsonLinesSink, JsonLinesSinkFactory, RecordSink, SinkFactory};
pub use source::CommentSource;
pub use stats::{BatchStatistics, StatsCollector, TopComment};
pub use types::{
    CommentPage, CommentRecord, ListingResponse, PageCursor, Truncation, VideoId, VideoReference,
};

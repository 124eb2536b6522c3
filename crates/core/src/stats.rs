use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    batch::{VideoOutcome, VideoStatus},
    format::truncate_text,
    types::CommentRecord,
};

const TOP_COMMENT_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopComment {
    pub video_id: String,
    pub author: String,
    /// First 50 characters of the comment body
    pub text: String,
    pub like_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStatistics {
    pub total_comments: u64,
    pub unique_authors: usize,
    pub videos_processed: usize,
    pub successful_videos: usize,
    pub total_likes: u64,
    pub average_comments_per_video: f64,
    pub most_liked: Option<TopComment>,
    pub earliest_comment: Option<DateTime<Utc>>,
    pub latest_comment: Option<DateTime<Utc>>,
    pub failed_videos: Vec<String>,
}

/// Accumulates statistics over every record written during a batch.
#[derive(Debug, Default)]
pub struct StatsCollector {
    total_comments: u64,
    authors: HashSet<String>,
    total_likes: u64,
    most_liked: Option<TopComment>,
    earliest: Option<DateTime<Utc>>,
    latest: Option<DateTime<Utc>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, record: &CommentRecord) {
        self.total_comments += 1;
        self.total_likes = self.total_likes.saturating_add(record.like_count);
        if !self.authors.contains(&record.author) {
            self.authors.insert(record.author.clone());
        }

        let beats_top = self
            .most_liked
            .as_ref()
            .is_none_or(|top| record.like_count > top.like_count);
        if beats_top {
            self.most_liked = Some(TopComment {
                video_id: record.video_id.clone(),
                author: record.author.clone(),
                text: truncate_text(&record.text, TOP_COMMENT_PREVIEW_CHARS),
                like_count: record.like_count,
            });
        }

        self.earliest = Some(self.earliest.map_or(record.created_at, |t| t.min(record.created_at)));
        self.latest = Some(self.latest.map_or(record.created_at, |t| t.max(record.created_at)));
    }

    /// Fold `other` into `self`. On equal like counts the comment already
    /// held by `self` wins, so merging in input order is deterministic.
    pub fn merge(&mut self, other: StatsCollector) {
        self.total_comments += other.total_comments;
        self.total_likes = self.total_likes.saturating_add(other.total_likes);
        self.authors.extend(other.authors);

        if let Some(top) = other.most_liked {
            let beats_top = self
                .most_liked
                .as_ref()
                .is_none_or(|current| top.like_count > current.like_count);
            if beats_top {
                self.most_liked = Some(top);
            }
        }

        self.earliest = match (self.earliest, other.earliest) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.latest = match (self.latest, other.latest) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn finish(self, outcomes: &[VideoOutcome]) -> BatchStatistics {
        let mut successful_videos = 0;
        let mut successful_comments = 0u64;
        let mut videos_processed = 0;
        let mut failed_videos = Vec::new();

        for outcome in outcomes {
            match &outcome.status {
                VideoStatus::Success | VideoStatus::Truncated(_) => {
                    videos_processed += 1;
                    successful_videos += 1;
                    successful_comments += outcome.comments;
                }
                VideoStatus::Failed(_) => {
                    videos_processed += 1;
                    failed_videos.push(outcome.reference.to_string());
                }
                VideoStatus::Cancelled | VideoStatus::Duplicate { .. } => {}
            }
        }

        let average_comments_per_video = if successful_videos > 0 {
            let average = successful_comments as f64 / successful_videos as f64;
            (average * 100.0).round() / 100.0
        } else {
            0.0
        };

        BatchStatistics {
            total_comments: self.total_comments,
            unique_authors: self.authors.len(),
            videos_processed,
            successful_videos,
            total_likes: self.total_likes,
            average_comments_per_video,
            most_liked: self.most_liked,
            earliest_comment: self.earliest,
            latest_comment: self.latest,
            failed_videos,
        }
    }
}

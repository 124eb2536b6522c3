//! Scripted in-memory comment source and sinks for tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::{
    error::{Result as FetchResult, SourceError},
    sink::{RecordSink, SinkFactory},
    source::CommentSource,
    types::{CommentPage, CommentRecord, ListingResponse, PageCursor, VideoId},
};

pub type Scripted = Result<ListingResponse, SourceError>;

/// Replays queued responses per video id and records every call.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, video_id: &str, response: Scripted) {
        self.scripts
            .lock()
            .expect("ScriptedSource poisoned")
            .entry(video_id.to_string())
            .or_default()
            .push_back(response);
    }

    /// Queue `sizes.len()` pages of fresh comments, chained by cursors `c1`, `c2`, ...
    pub fn push_pages(&self, video_id: &str, sizes: &[usize]) {
        let mut next_id = 0;
        for (index, size) in sizes.iter().enumerate() {
            let comments = (next_id..next_id + size)
                .map(|n| comment(video_id, &format!("{}-{}", video_id, n)))
                .collect();
            next_id += size;

            let next_cursor =
                (index + 1 < sizes.len()).then(|| PageCursor::new(format!("c{}", index + 1)));
            self.push(video_id, Ok(page(comments, next_cursor)));
        }
    }

    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().expect("ScriptedSource poisoned").clone()
    }

    pub fn calls_for(&self, video_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(id, _)| id == video_id)
            .count()
    }
}

#[async_trait]
impl CommentSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn list_comments(
        &self,
        video_id: &VideoId,
        cursor: Option<&PageCursor>,
    ) -> Result<ListingResponse, SourceError> {
        self.calls.lock().expect("ScriptedSource poisoned").push((
            video_id.as_str().to_string(),
            cursor.map(|c| c.as_str().to_string()),
        ));

        self.scripts
            .lock()
            .expect("ScriptedSource poisoned")
            .get_mut(video_id.as_str())
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Ok(page(Vec::new(), None)))
    }
}

#[derive(Default)]
struct MemoryStore {
    records: HashMap<String, Vec<CommentRecord>>,
    finished: HashSet<String>,
}

/// Keeps every sink's records in memory, keyed by video id.
#[derive(Clone, Default)]
pub struct MemorySinkFactory {
    store: Arc<Mutex<MemoryStore>>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self, video_id: &str) -> Vec<CommentRecord> {
        let store = self.store.lock().expect("MemorySinkFactory poisoned");
        store.records.get(video_id).cloned().unwrap_or_default()
    }

    pub fn is_finished(&self, video_id: &str) -> bool {
        let store = self.store.lock().expect("MemorySinkFactory poisoned");
        store.finished.contains(video_id)
    }

    pub fn opened(&self) -> usize {
        let store = self.store.lock().expect("MemorySinkFactory poisoned");
        store.records.len()
    }
}

struct MemorySink {
    video_id: String,
    store: Arc<Mutex<MemoryStore>>,
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn append(&mut self, record: &CommentRecord) -> FetchResult<()> {
        let mut store = self.store.lock().expect("MemorySinkFactory poisoned");
        store
            .records
            .entry(self.video_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn finish(&mut self) -> FetchResult<()> {
        let mut store = self.store.lock().expect("MemorySinkFactory poisoned");
        store.finished.insert(self.video_id.clone());
        Ok(())
    }
}

#[async_trait]
impl SinkFactory for MemorySinkFactory {
    async fn open(&self, video_id: &VideoId) -> FetchResult<Box<dyn RecordSink>> {
        let mut store = self.store.lock().expect("MemorySinkFactory poisoned");
        store
            .records
            .entry(video_id.to_string())
            .or_default();
        Ok(Box::new(MemorySink {
            video_id: video_id.to_string(),
            store: Arc::clone(&self.store),
        }))
    }
}

pub fn comment(video_id: &str, id: &str) -> CommentRecord {
    CommentRecord {
        id: id.to_string(),
        video_id: video_id.to_string(),
        author: format!("user_{}", id),
        author_nickname: None,
        text: format!("comment {}", id),
        like_count: 1,
        reply_count: 0,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
    }
}

pub fn page(comments: Vec<CommentRecord>, next_cursor: Option<PageCursor>) -> ListingResponse {
    ListingResponse::Page(CommentPage {
        comments,
        next_cursor,
    })
}

pub fn cursor(token: &str) -> Option<PageCursor> {
    Some(PageCursor::new(token))
}

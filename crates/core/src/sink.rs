//! Per-video record destinations.

use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
};

use crate::{
    error::{FetchError, Result},
    output,
    types::{CommentRecord, VideoId},
};

/// Receives the records of one video in arrival order.
#[async_trait]
pub trait RecordSink: Send {
    async fn append(&mut self, record: &CommentRecord) -> Result<()>;

    /// Flush and close. Records appended before this call stay valid even
    /// when the session that produced them failed.
    async fn finish(&mut self) -> Result<()>;

    fn location(&self) -> Option<&Path> {
        None
    }
}

/// Opens one [`RecordSink`] per video.
#[async_trait]
pub trait SinkFactory: Send + Sync {
    async fn open(&self, video_id: &VideoId) -> Result<Box<dyn RecordSink>>;
}

/// One JSON object per line.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl JsonLinesSink {
    /// Create (or truncate) the file at `path`.
    pub async fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn append(&mut self, record: &CommentRecord) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(FetchError::IoError(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("sink {} already finished", self.path.display()),
            )));
        };

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        self.written += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
        }
        Ok(())
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Writes `<output_dir>/<video_id>.jsonl`.
pub struct JsonLinesSinkFactory {
    output_dir: PathBuf,
}

impl JsonLinesSinkFactory {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[async_trait]
impl SinkFactory for JsonLinesSinkFactory {
    async fn open(&self, video_id: &VideoId) -> Result<Box<dyn RecordSink>> {
        output::ensure_output_dir(&self.output_dir).await?;
        let sink = JsonLinesSink::create(&output::video_output_path(&self.output_dir, video_id))
            .await?;
        Ok(Box::new(sink))
    }
}

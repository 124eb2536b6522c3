use std::path::{Path, PathBuf};

use tokio::fs;

use crate::{error::Result, types::VideoId};

pub const DEFAULT_OUTPUT_DIR: &str = "comments";

/// Get the JSON Lines file holding the comments of one video
pub fn video_output_path(output_dir: &Path, video_id: &VideoId) -> PathBuf {
    output_dir.join(format!("{}.jsonl", video_id))
}

/// Get the path of the batch summary
pub fn summary_path(output_dir: &Path) -> PathBuf {
    output_dir.join("summary.json")
}

pub async fn ensure_output_dir(output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir).await?;
    Ok(())
}

/// Write `value` as pretty JSON to `<output_dir>/summary.json`
pub async fn save_summary<T: serde::Serialize>(value: &T, output_dir: &Path) -> Result<PathBuf> {
    ensure_output_dir(output_dir).await?;
    let path = summary_path(output_dir);
    let pretty_json = serde_json::to_string_pretty(value)?;
    fs::write(&path, &pretty_json).await?;
    Ok(path)
}

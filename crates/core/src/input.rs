use std::{collections::HashSet, path::Path};

use tokio::fs;
use tracing::warn;

use crate::{error::Result, types::VideoReference};

/// Parse a video list: one reference per line, blank lines and `#` comments
/// skipped, repeated references dropped.
pub fn parse_references(text: &str) -> Vec<VideoReference> {
    let mut seen = HashSet::new();
    let mut references = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !seen.insert(line) {
            warn!(line = line_no + 1, reference = line, "Skipping duplicate reference");
            continue;
        }
        references.push(VideoReference::new(line));
    }

    references
}

pub async fn load_references(path: &Path) -> Result<Vec<VideoReference>> {
    let text = fs::read_to_string(path).await?;
    Ok(parse_references(&text))
}

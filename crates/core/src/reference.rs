//! Turning user supplied video references into platform video ids.

use std::sync::LazyLock;

use regex::Regex;

use crate::{
    error::{FetchError, Result},
    types::{VideoId, VideoReference},
};

static BARE_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{8,25}$").unwrap());

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:[A-Za-z0-9-]+\.)*tiktok\.com/(?:@[^/?#]+/)?(?:video|photo|v)/(\d{8,25})(?:[/?#.]|$)",
    )
    .unwrap()
});

/// Extract the numeric video id from a bare id or a video page URL.
///
/// Short share links (`vm.tiktok.com/...`) carry no id and are rejected, they
/// would need a redirect round trip to resolve.
pub fn resolve(reference: &VideoReference) -> Result<VideoId> {
    let raw = reference.as_str().trim();

    if raw.is_empty() {
        return Err(FetchError::invalid_reference(
            reference.as_str(),
            "reference is empty",
        ));
    }

    if BARE_ID_REGEX.is_match(raw) {
        return Ok(VideoId::new_unchecked(raw));
    }

    URL_REGEX
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|id| VideoId::new_unchecked(id.as_str()))
        .ok_or_else(|| FetchError::invalid_reference(raw, "no video id found"))
}

//! [`CommentSource`] backed by the platform's web comment listing endpoint.

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use rand::RngExt;
use reqwest::{
    StatusCode,
    header::{COOKIE, REFERER, USER_AGENT},
};
use serde::{
    Deserialize, Deserializer,
    de::{self, Unexpected},
};
use serde_json::Value;
use tracing::debug;

use crate::{
    config::HttpConfig,
    error::SourceError,
    format::parse_count,
    source::CommentSource,
    types::{CommentPage, CommentRecord, ListingResponse, PageCursor, VideoId},
};

const WEB_APP_ID: &str = "1988";
const REFERER_URL: &str = "https://www.tiktok.com/";

pub struct HttpCommentSource {
    client: reqwest::Client,
    config: HttpConfig,
    page_size: u32,
}

impl HttpCommentSource {
    pub fn new(config: HttpConfig, page_size: u32) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config,
            page_size,
        })
    }

    fn pick_user_agent(&self) -> Option<&str> {
        let agents = &self.config.user_agents;
        if agents.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..agents.len());
        Some(agents[index].as_str())
    }
}

#[async_trait]
impl CommentSource for HttpCommentSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn list_comments(
        &self,
        video_id: &VideoId,
        cursor: Option<&PageCursor>,
    ) -> Result<ListingResponse, SourceError> {
        let cursor = cursor.map(PageCursor::as_str).unwrap_or("0");
        let count = self.page_size.to_string();

        let mut request = self
            .client
            .get(&self.config.api_url)
            .query(&[
                ("aweme_id", video_id.as_str()),
                ("cursor", cursor),
                ("count", count.as_str()),
                ("aid", WEB_APP_ID),
            ])
            .header(REFERER, REFERER_URL);

        if let Some(agent) = self.pick_user_agent() {
            request = request.header(USER_AGENT, agent);
        }
        if let Some(cookie) = &self.config.cookie {
            request = request.header(COOKIE, cookie);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(%video_id, cursor, %status, "Comment listing responded");

        if let Some(outcome) = classify_status(status) {
            return outcome;
        }

        let body = response.text().await?;
        parse_listing(&body, video_id, &self.config.rate_limit_status_codes)
    }
}

/// Map a non-success HTTP status onto a listing outcome.
///
/// `None` means the body should be parsed.
pub fn classify_status(status: StatusCode) -> Option<Result<ListingResponse, SourceError>> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Some(Ok(ListingResponse::RateLimited));
    }
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return Some(Err(SourceError::Transport(format!("HTTP {}", status))));
    }
    if !status.is_success() {
        return Some(Err(SourceError::Rejected {
            status_code: status.as_u16() as i64,
            message: status.canonical_reason().unwrap_or_default().to_string(),
        }));
    }
    None
}

#[derive(Debug, Deserialize)]
struct RawListing {
    status_code: i64,
    #[serde(default)]
    status_msg: Option<String>,
    #[serde(default)]
    comments: Option<Vec<RawComment>>,
    #[serde(default, deserialize_with = "deserialize_token")]
    cursor: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    cid: String,
    text: String,
    create_time: i64,
    #[serde(default, deserialize_with = "deserialize_count")]
    digg_count: u64,
    #[serde(default, deserialize_with = "deserialize_count")]
    reply_comment_total: u64,
    user: RawUser,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    unique_id: String,
    #[serde(default)]
    nickname: Option<String>,
}

/// Map a listing body onto the strict page schema.
///
/// An empty body is how the endpoint throttles clients, so it counts as a
/// rate-limit signal rather than a malformed response.
pub fn parse_listing(
    body: &str,
    video_id: &VideoId,
    rate_limit_status_codes: &[i64],
) -> Result<ListingResponse, SourceError> {
    if body.trim().is_empty() {
        return Ok(ListingResponse::RateLimited);
    }

    let raw: RawListing =
        serde_json::from_str(body).map_err(|e| SourceError::Malformed(e.to_string()))?;

    if raw.status_code != 0 {
        if rate_limit_status_codes.contains(&raw.status_code) {
            return Ok(ListingResponse::RateLimited);
        }
        return Err(SourceError::Rejected {
            status_code: raw.status_code,
            message: raw.status_msg.unwrap_or_default(),
        });
    }

    let comments = raw
        .comments
        .unwrap_or_default()
        .into_iter()
        .map(|comment| into_record(comment, video_id))
        .collect::<Result<Vec<_>, _>>()?;

    let next_cursor = if raw.has_more {
        match raw.cursor {
            Some(token) if !token.is_empty() => Some(PageCursor::new(token)),
            _ => {
                return Err(SourceError::Malformed(
                    "has_more is set but no cursor was returned".to_string(),
                ));
            }
        }
    } else {
        None
    };

    Ok(ListingResponse::Page(CommentPage {
        comments,
        next_cursor,
    }))
}

fn into_record(raw: RawComment, video_id: &VideoId) -> Result<CommentRecord, SourceError> {
    if raw.cid.trim().is_empty() {
        return Err(SourceError::Malformed("comment without cid".to_string()));
    }
    if raw.user.unique_id.trim().is_empty() {
        return Err(SourceError::Malformed(format!(
            "comment {} has no author handle",
            raw.cid
        )));
    }

    let created_at = DateTime::from_timestamp(raw.create_time, 0)
        .filter(|_| raw.create_time > 0)
        .ok_or_else(|| {
            SourceError::Malformed(format!(
                "comment {} has invalid create_time {}",
                raw.cid, raw.create_time
            ))
        })?;

    Ok(CommentRecord {
        id: raw.cid,
        video_id: video_id.to_string(),
        author: raw.user.unique_id,
        author_nickname: raw.user.nickname.filter(|n| !n.is_empty()),
        text: raw.text,
        like_count: raw.digg_count,
        reply_count: raw.reply_comment_total,
        created_at,
    })
}

fn deserialize_token<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Err(de::Error::invalid_type(
            Unexpected::Bool(b),
            &"string or number",
        )),
        Some(Value::Array(_)) => Err(de::Error::invalid_type(
            Unexpected::Seq,
            &"string or number",
        )),
        Some(Value::Object(_)) => Err(de::Error::invalid_type(
            Unexpected::Map,
            &"string or number",
        )),
    }
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(b),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(de::Error::invalid_value(
                Unexpected::Other("number other than 0 or 1"),
                &"boolean flag",
            )),
        },
        Some(Value::String(s)) => Err(de::Error::invalid_type(
            Unexpected::Str(&s),
            &"boolean flag",
        )),
        Some(Value::Array(_)) => Err(de::Error::invalid_type(Unexpected::Seq, &"boolean flag")),
        Some(Value::Object(_)) => Err(de::Error::invalid_type(Unexpected::Map, &"boolean flag")),
    }
}

fn deserialize_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| {
            de::Error::invalid_value(
                Unexpected::Other("negative or fractional number"),
                &"non-negative integer",
            )
        }),
        Some(Value::String(s)) => parse_count(&s)
            .ok_or_else(|| de::Error::invalid_value(Unexpected::Str(&s), &"count like 1.2K")),
        Some(Value::Bool(b)) => Err(de::Error::invalid_type(Unexpected::Bool(b), &"count")),
        Some(Value::Array(_)) => Err(de::Error::invalid_type(Unexpected::Seq, &"count")),
        Some(Value::Object(_)) => Err(de::Error::invalid_type(Unexpected::Map, &"count")),
    }
}

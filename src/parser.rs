use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<.*?>").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";
/// Asia/Kolkata, which has no DST.
const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// Structured fields extracted from a `TweetResultByRestId` payload.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct TweetRecord {
    pub(crate) tweet_id: String,
    pub(crate) name: Option<String>,
    pub(crate) screen_name: Option<String>,
    pub(crate) created_at: Option<DateTime<FixedOffset>>,
    pub(crate) text: String,
    pub(crate) retweet_count: i64,
    pub(crate) reply_count: i64,
    pub(crate) like_count: i64,
    pub(crate) quote_count: i64,
    pub(crate) repost_count: i64,
    pub(crate) total_views: i64,
    pub(crate) bookmark_count: i64,
}

/// Returns `None` for anything that does not carry a tweet id.
pub(crate) fn parse_tweet(payload: &Value) -> Option<TweetRecord> {
    let mut result = payload.pointer("/data/tweetResult/result")?;
    if result.get("legacy").is_none() {
        // TweetWithVisibilityResults wraps the tweet one level down.
        result = result.get("tweet")?;
    }
    let legacy = result.get("legacy")?;

    let tweet_id = legacy.get("id_str")?.as_str()?.to_string();
    if tweet_id.is_empty() {
        return None;
    }

    let user = result.pointer("/core/user_results/result");
    let user_field = |key: &str| {
        user.and_then(|u| {
            u.pointer(&format!("/core/{key}"))
                .or_else(|| u.pointer(&format!("/legacy/{key}")))
        })
        .and_then(Value::as_str)
        .map(str::to_string)
    };

    let retweet_count = count(legacy.get("retweet_count"));
    let quote_count = count(legacy.get("quote_count"));

    Some(TweetRecord {
        tweet_id,
        name: user_field("name"),
        screen_name: user_field("screen_name"),
        created_at: legacy
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(to_ist),
        text: legacy
            .get("full_text")
            .and_then(Value::as_str)
            .map(clean_text)
            .unwrap_or_default(),
        retweet_count,
        reply_count: count(legacy.get("reply_count")),
        like_count: count(legacy.get("favorite_count")),
        quote_count,
        repost_count: retweet_count + quote_count,
        total_views: count(result.pointer("/views/count")),
        bookmark_count: count(legacy.get("bookmark_count")),
    })
}

/// Counters arrive as numbers, except view counts which are strings.
fn count(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn to_ist(created_at: &str) -> Option<DateTime<FixedOffset>> {
    let parsed = DateTime::parse_from_str(created_at, CREATED_AT_FORMAT).ok()?;
    Some(parsed.with_timezone(&FixedOffset::east_opt(IST_OFFSET_SECS)?))
}

pub(crate) fn clean_text(text: &str) -> String {
    let text = HTML_TAG.replace_all(text, "");
    let text = text
        .replace("\\n", " ")
        .replace("\\t", " ")
        .replace("\\r", " ");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

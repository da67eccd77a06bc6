// RSS/Atom article source.
//
// Fetches every configured feed concurrently, keeps entries published inside
// the lookback window, and turns them into plain-text articles.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::{self, StreamExt};
use regex::Regex;
use tracing::{info, warn};

use breachcase_common::Article;

use crate::traits::ArticleSource;

const MAX_BODY_CHARS: usize = 1000;

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("Invalid HTML tag regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
}

impl FeedSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

pub const DEFAULT_FEEDS: &[(&str, &str)] = &[
    ("BleepingComputer", "https://www.bleepingcomputer.com/feed/"),
    ("The Hacker News", "https://thehackernews.com/feeds/posts/default"),
    ("DataBreachToday", "https://www.databreachtoday.co.uk/rss-feeds"),
    ("Krebs on Security", "https://krebsonsecurity.com/feed/"),
    ("HelpNet Security", "https://www.helpnetsecurity.com/feed"),
    ("NCSC UK", "https://www.ncsc.gov.uk/api/1/services/v1/all-rss-feed.xml"),
    ("Check Point Research", "https://research.checkpoint.com/feed"),
    (
        "Have I Been Pwned",
        "https://feeds.feedburner.com/HaveIBeenPwnedLatestBreaches",
    ),
];

pub fn default_feeds() -> Vec<FeedSource> {
    DEFAULT_FEEDS
        .iter()
        .map(|(name, url)| FeedSource::new(*name, *url))
        .collect()
}

pub struct FeedArticleSource {
    client: reqwest::Client,
    feeds: Vec<FeedSource>,
    lookback_hours: i64,
    max_workers: usize,
}

impl FeedArticleSource {
    pub fn new(timeout: Duration, lookback_hours: i64, max_workers: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("breachcase-scout/0.1")
            .build()
            .context("Failed to build feed HTTP client")?;
        Ok(Self {
            client,
            feeds: default_feeds(),
            lookback_hours,
            max_workers: max_workers.max(1),
        })
    }

    async fn fetch_feed(&self, feed: &FeedSource, cutoff: DateTime<Utc>) -> Result<Vec<Article>> {
        let bytes = self
            .client
            .get(&feed.url)
            .send()
            .await
            .context("Feed fetch failed")?
            .error_for_status()
            .context("Feed returned error status")?
            .bytes()
            .await
            .context("Failed to read feed body")?;
        parse_feed(&bytes, &feed.name, cutoff, Utc::now())
    }
}

#[async_trait]
impl ArticleSource for FeedArticleSource {
    async fn fetch_articles(&self) -> Result<Vec<Article>> {
        let cutoff = lookback_cutoff(Utc::now(), self.lookback_hours)?;

        let results: Vec<(FeedSource, Result<Vec<Article>>)> =
            stream::iter(self.feeds.iter().cloned())
                .map(|feed| async move {
                    let result = self.fetch_feed(&feed, cutoff).await;
                    (feed, result)
                })
                .buffer_unordered(self.max_workers)
                .collect()
                .await;

        let mut seen = HashSet::new();
        let mut articles = Vec::new();
        for (feed, result) in results {
            match result {
                Ok(batch) => {
                    info!(feed = feed.name.as_str(), articles = batch.len(), "Fetched feed");
                    articles.extend(batch.into_iter().filter(|a| seen.insert(a.url.clone())));
                }
                Err(e) => {
                    warn!(feed = feed.name.as_str(), url = feed.url.as_str(), error = %e, "Feed fetch failed, skipping");
                }
            }
        }

        info!(total = articles.len(), feeds = self.feeds.len(), "Feed fetch complete");
        Ok(articles)
    }
}

/// Oldest publication time still inside the lookback window.
pub fn lookback_cutoff(now: DateTime<Utc>, lookback_hours: i64) -> Result<DateTime<Utc>> {
    TimeDelta::try_hours(lookback_hours)
        .and_then(|window| now.checked_sub_signed(window))
        .with_context(|| format!("lookback of {lookback_hours} hours is out of range"))
}

/// Parse one RSS/Atom document. Entries without a date are treated as
/// published `now`; entries without a link or title are dropped.
pub fn parse_feed(
    bytes: &[u8],
    source_name: &str,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Vec<Article>> {
    let feed = feed_rs::parser::parse(bytes).context("Failed to parse RSS/Atom feed")?;

    let articles = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let url = entry
                .links
                .first()
                .map(|l| l.href.trim().to_string())
                .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))?;

            let title = entry
                .title
                .map(|t| t.content.trim().to_string())
                .filter(|t| !t.is_empty());
            let Some(title) = title else {
                warn!(source = source_name, url = url.as_str(), "Entry missing title, skipping");
                return None;
            };

            let published = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(now);
            if published < cutoff {
                return None;
            }

            let raw_body = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .unwrap_or_default();

            Some(Article {
                url,
                title,
                body_text: truncate_chars(&strip_html(&raw_body), MAX_BODY_CHARS),
                organization_name_hint: None,
                source_name: Some(source_name.to_string()),
                published_at: Some(published),
            })
        })
        .collect();

    Ok(articles)
}

/// Drop tags, decode the common entities, collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let text = HTML_TAG.replace_all(html, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#8217;", "'")
        .replace("&amp;", "&");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

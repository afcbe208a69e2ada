use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ArticleId = u64;

/// A candidate item as produced by the content feed, before it is stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: ArticleId,
    pub title: String,
    pub url: Option<String>,
    pub tags: Vec<String>,
    pub score: u64,
    pub descendants: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    pub url: Option<String>,
    pub tags: Vec<String>,
    pub score: u64,
    pub descendants: u64,
    pub fetched_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub message_ref: Option<String>,
    pub liked: bool,
}

impl Article {
    /// Builds a stored article from a feed item. Tags are treated as a set:
    /// duplicates are dropped, first occurrence wins.
    pub fn from_feed_item(item: FeedItem, fetched_at: DateTime<Utc>) -> Self {
        Self {
            id: item.id,
            title: item.title,
            url: item.url,
            tags: dedup_tags(item.tags),
            score: item.score,
            descendants: item.descendants,
            fetched_at,
            delivered_at: None,
            message_ref: None,
            liked: false,
        }
    }
}

pub fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter().filter(|tag| seen.insert(tag.clone())).collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TagWeight {
    pub tag: String,
    pub weight: f64,
    pub count: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackDirection {
    Like,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub article_id: ArticleId,
    pub direction: FeedbackDirection,
}

impl FeedbackEvent {
    pub fn like(article_id: ArticleId) -> Self {
        Self {
            article_id,
            direction: FeedbackDirection::Like,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettingsEntry {
    pub key: String,
    pub value: String,
    pub default: String,
}

// Collaborator style note:
// Every trait below is a narrow seam over something the hosting process owns
// (an HTTP API, a database, a chat platform). Implementations hold no
// business rules; the engine crate owns those.

/// Supplies candidate items for a digest cycle.
#[async_trait]
pub trait ContentFeed: Send + Sync {
    fn source_name(&self) -> String;

    async fn fetch_candidates(&self, limit: usize) -> Result<Vec<FeedItem>>;
}

/// Durable mapping of tag to (weight, observation count).
#[async_trait]
pub trait TagWeightStore: Send + Sync {
    async fn get(&self, tag: &str) -> Result<Option<TagWeight>>;

    async fn set(&self, weight: &TagWeight) -> Result<()>;

    /// Drops the entry for `tag`; removing an absent tag is not an error.
    async fn remove(&self, tag: &str) -> Result<()>;

    async fn get_all(&self) -> Result<HashMap<String, TagWeight>>;
}

/// Durable key/value settings storage.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Inserts the article or refreshes its feed-derived fields, keeping
    /// delivery metadata and the liked flag of an existing row.
    async fn upsert(&self, article: &Article) -> Result<()>;

    async fn get(&self, id: ArticleId) -> Result<Option<Article>>;

    async fn mark_delivered(&self, id: ArticleId, at: DateTime<Utc>, message_ref: &str) -> Result<()>;

    async fn mark_liked(&self, id: ArticleId) -> Result<()>;

    async fn unmark_liked(&self, id: ArticleId) -> Result<()>;

    async fn delivered_ids(&self) -> Result<HashSet<ArticleId>>;
}

/// Delivers one ranked article and returns a reference to the sent message.
#[async_trait]
pub trait DigestSink: Send + Sync {
    async fn deliver(&self, position: usize, article: &Article) -> Result<String>;
}

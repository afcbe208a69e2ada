use crate::types::{ContentFeed, DigestError, FeedItem, HackerNewsConfig, Result};
use crate::utils::derive_tags;
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Item as served by `item/<id>.json`. Every field but `id` may be absent.
#[derive(Debug, Deserialize)]
struct HnItem {
    id: u64,
    #[serde(rename = "type")]
    kind: Option<String>,
    title: Option<String>,
    url: Option<String>,
    score: Option<u64>,
    descendants: Option<u64>,
    #[serde(default)]
    dead: bool,
    #[serde(default)]
    deleted: bool,
}

impl HnItem {
    fn into_feed_item(self) -> Option<FeedItem> {
        if self.dead || self.deleted || self.kind.as_deref() != Some("story") {
            return None;
        }
        let title = self.title?;
        let tags = derive_tags(&title, self.url.as_deref());

        Some(FeedItem {
            id: self.id,
            title,
            url: self.url,
            tags,
            score: self.score.unwrap_or(0),
            descendants: self.descendants.unwrap_or(0),
        })
    }
}

/// Content feed backed by the Hacker News JSON API.
pub struct HackerNewsFeed {
    client: Client,
    base_url: Url,
    config: HackerNewsConfig,
}

impl HackerNewsFeed {
    pub fn new(config: HackerNewsConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()?;

        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    pub async fn top_story_ids(&self) -> Result<Vec<u64>> {
        self.get_json("topstories.json").await
    }

    pub async fn fetch_item(&self, id: u64) -> Result<Option<FeedItem>> {
        let item: Option<HnItem> = self.get_json(&format!("item/{}.json", id)).await?;
        Ok(item.and_then(HnItem::into_feed_item))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path)?;

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_millis(self.config.retry_delay_millis),
            initial_interval: Duration::from_millis(self.config.retry_delay_millis),
            max_interval: Duration::from_millis(self.config.retry_delay_millis * 32),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut attempt = 0;
        loop {
            let error = match self.client.get(url.clone()).send().await {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.json::<T>().await?);
                }
                Ok(response) => {
                    let status = response.status();
                    let error = DigestError::General(format!(
                        "HTTP {}: {}",
                        status,
                        status.canonical_reason().unwrap_or("Unknown")
                    ));
                    if !is_retryable(status) {
                        return Err(error);
                    }
                    error
                }
                Err(e) => DigestError::Http(e),
            };

            if attempt >= self.config.max_retries {
                return Err(error);
            }
            attempt += 1;
            match backoff.next_backoff() {
                Some(delay) => {
                    warn!("Attempt {} failed for {}: {}, retrying in {:?}", attempt, url, error, delay);
                    tokio::time::sleep(delay).await;
                }
                None => return Err(error),
            }
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl ContentFeed for HackerNewsFeed {
    fn source_name(&self) -> String {
        format!("Hacker News ({})", self.base_url)
    }

    async fn fetch_candidates(&self, limit: usize) -> anyhow::Result<Vec<FeedItem>> {
        let ids = self.top_story_ids().await?;
        let ids: Vec<u64> = ids.into_iter().take(limit).collect();
        debug!("Fetching {} top stories", ids.len());

        let results = join_all(ids.iter().map(|&id| self.fetch_item(id))).await;

        let mut items = Vec::with_capacity(results.len());
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(Some(item)) => items.push(item),
                Ok(None) => debug!("Skipping item {}: not a live story", id),
                Err(e) => warn!("Failed to fetch item {}: {}", id, e),
            }
        }

        info!("Fetched {} candidate stories from {}", items.len(), self.base_url);
        Ok(items)
    }
}

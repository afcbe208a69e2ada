#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use digest_engine::{
    Article, ArticleId, ArticleStore, ContentFeed, DigestPipeline, DigestSink, FeedItem,
    PreferenceModel, SettingsManager, SettingsStore, TagWeight, TagWeightStore, DEFAULT_SETTINGS,
};
use interfaces::{MemoryArticleStore, MemorySettingsStore, MemoryTagWeightStore};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn item(id: ArticleId, score: u64, tags: &[&str]) -> FeedItem {
    FeedItem {
        id,
        title: format!("Story {}", id),
        url: Some(format!("https://example.com/{}", id)),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        score,
        descendants: 0,
    }
}

pub fn weight(tag: &str, weight: f64, count: u64) -> TagWeight {
    TagWeight {
        tag: tag.to_string(),
        weight,
        count,
    }
}

/// Feed that serves a fixed list, honouring the limit.
pub struct StaticFeed {
    items: Mutex<Vec<FeedItem>>,
}

impl StaticFeed {
    pub fn new(items: Vec<FeedItem>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }

    pub fn replace(&self, items: Vec<FeedItem>) {
        *self.items.lock().unwrap() = items;
    }
}

#[async_trait]
impl ContentFeed for StaticFeed {
    fn source_name(&self) -> String {
        "static".to_string()
    }

    async fn fetch_candidates(&self, limit: usize) -> Result<Vec<FeedItem>> {
        Ok(self.items.lock().unwrap().iter().take(limit).cloned().collect())
    }
}

pub struct UnreachableFeed;

#[async_trait]
impl ContentFeed for UnreachableFeed {
    fn source_name(&self) -> String {
        "unreachable".to_string()
    }

    async fn fetch_candidates(&self, _limit: usize) -> Result<Vec<FeedItem>> {
        Err(anyhow!("connection refused"))
    }
}

/// Records every delivery in order; ids in `failing` are rejected.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<(usize, ArticleId)>>,
    failing: HashSet<ArticleId>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(ids: &[ArticleId]) -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            failing: ids.iter().copied().collect(),
        }
    }

    pub fn delivered(&self) -> Vec<(usize, ArticleId)> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_ids(&self) -> Vec<ArticleId> {
        self.delivered().into_iter().map(|(_, id)| id).collect()
    }
}

#[async_trait]
impl DigestSink for RecordingSink {
    async fn deliver(&self, position: usize, article: &Article) -> Result<String> {
        if self.failing.contains(&article.id) {
            return Err(anyhow!("chat platform rejected article {}", article.id));
        }
        self.delivered.lock().unwrap().push((position, article.id));
        Ok(format!("msg-{}", article.id))
    }
}

/// Tag store whose `set` fails on the given call numbers (1-based) and whose
/// `remove` can be made to fail.
pub struct FlakyTagWeightStore {
    inner: MemoryTagWeightStore,
    failing_sets: HashSet<usize>,
    fail_removes: bool,
    sets: AtomicUsize,
}

impl FlakyTagWeightStore {
    pub fn new(initial: Vec<TagWeight>, failing_sets: &[usize]) -> Self {
        Self {
            inner: MemoryTagWeightStore::with_weights(initial),
            failing_sets: failing_sets.iter().copied().collect(),
            fail_removes: false,
            sets: AtomicUsize::new(0),
        }
    }

    pub fn with_failing_removes(mut self) -> Self {
        self.fail_removes = true;
        self
    }

    pub fn set_calls(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TagWeightStore for FlakyTagWeightStore {
    async fn get(&self, tag: &str) -> Result<Option<TagWeight>> {
        self.inner.get(tag).await
    }

    async fn set(&self, weight: &TagWeight) -> Result<()> {
        let call = self.sets.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_sets.contains(&call) {
            return Err(anyhow!("disk full on write {}", call));
        }
        self.inner.set(weight).await
    }

    async fn remove(&self, tag: &str) -> Result<()> {
        if self.fail_removes {
            return Err(anyhow!("disk full while removing {}", tag));
        }
        self.inner.remove(tag).await
    }

    async fn get_all(&self) -> Result<HashMap<String, TagWeight>> {
        self.inner.get_all().await
    }
}

/// Settings store whose reads fail from the start when asked to, and whose
/// writes can be switched to failing at any point.
#[derive(Default)]
pub struct FlakySettingsStore {
    inner: MemorySettingsStore,
    fail_reads: bool,
    fail_writes: AtomicBool,
}

impl FlakySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreadable() -> Self {
        Self {
            fail_reads: true,
            ..Self::default()
        }
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SettingsStore for FlakySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if self.fail_reads {
            return Err(anyhow!("settings table locked while reading {}", key));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("settings table locked while writing {}", key));
        }
        self.inner.set(key, value).await
    }
}

/// Article store that yields on every read, so concurrent callers
/// interleave, and whose `mark_liked` can be made to fail.
#[derive(Default)]
pub struct FlakyArticleStore {
    inner: MemoryArticleStore,
    fail_mark_liked: bool,
    fail_unmark_liked: bool,
}

impl FlakyArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_mark_liked() -> Self {
        Self {
            fail_mark_liked: true,
            ..Self::default()
        }
    }

    pub fn failing_unmark_liked() -> Self {
        Self {
            fail_unmark_liked: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ArticleStore for FlakyArticleStore {
    async fn upsert(&self, article: &Article) -> Result<()> {
        self.inner.upsert(article).await
    }

    async fn get(&self, id: ArticleId) -> Result<Option<Article>> {
        tokio::task::yield_now().await;
        self.inner.get(id).await
    }

    async fn mark_delivered(&self, id: ArticleId, at: DateTime<Utc>, message_ref: &str) -> Result<()> {
        self.inner.mark_delivered(id, at, message_ref).await
    }

    async fn mark_liked(&self, id: ArticleId) -> Result<()> {
        tokio::task::yield_now().await;
        if self.fail_mark_liked {
            return Err(anyhow!("article table locked while liking {}", id));
        }
        self.inner.mark_liked(id).await
    }

    async fn unmark_liked(&self, id: ArticleId) -> Result<()> {
        if self.fail_unmark_liked {
            return Err(anyhow!("article table locked while unliking {}", id));
        }
        self.inner.unmark_liked(id).await
    }

    async fn delivered_ids(&self) -> Result<HashSet<ArticleId>> {
        self.inner.delivered_ids().await
    }
}

pub fn stored_article(id: ArticleId, tags: &[&str]) -> Article {
    Article::from_feed_item(item(id, 10, tags), Utc::now())
}

/// Feedback-only pipeline over the given article and tag stores.
pub async fn feedback_pipeline(
    articles: Arc<dyn ArticleStore>,
    tags: Arc<dyn TagWeightStore>,
) -> DigestPipeline {
    let settings = settings_with(&[]).await;
    let preferences = Arc::new(PreferenceModel::new(
        tags,
        settings.preference_config().await.unwrap(),
    ));
    DigestPipeline::new(
        Arc::new(StaticFeed::new(Vec::new())),
        articles,
        Arc::new(RecordingSink::new()),
        preferences,
        settings,
    )
}

pub async fn settings_with(overrides: &[(&str, &str)]) -> Arc<SettingsManager> {
    let store = Arc::new(MemorySettingsStore::with_values(overrides.iter().copied()));
    Arc::new(SettingsManager::load(store, DEFAULT_SETTINGS).await.unwrap())
}

/// Everything a pipeline test needs to poke at afterwards.
pub struct Harness {
    pub pipeline: Arc<DigestPipeline>,
    pub feed: Arc<StaticFeed>,
    pub articles: Arc<MemoryArticleStore>,
    pub sink: Arc<RecordingSink>,
    pub tags: Arc<MemoryTagWeightStore>,
    pub settings: Arc<SettingsManager>,
}

pub async fn harness(
    items: Vec<FeedItem>,
    weights: Vec<TagWeight>,
    sink: RecordingSink,
    overrides: &[(&str, &str)],
) -> Harness {
    let feed = Arc::new(StaticFeed::new(items));
    let articles = Arc::new(MemoryArticleStore::new());
    let sink = Arc::new(sink);
    let tags = Arc::new(MemoryTagWeightStore::with_weights(weights));
    let settings = settings_with(overrides).await;
    let preferences = Arc::new(PreferenceModel::new(
        tags.clone(),
        settings.preference_config().await.unwrap(),
    ));

    let pipeline = Arc::new(DigestPipeline::new(
        feed.clone(),
        articles.clone(),
        sink.clone(),
        preferences,
        settings.clone(),
    ));

    Harness {
        pipeline,
        feed,
        articles,
        sink,
        tags,
        settings,
    }
}

use std::collections::{HashMap, HashSet};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::defs::{Article, ArticleId, ArticleStore, SettingsStore, TagWeight, TagWeightStore};

/// Process-local tag weights. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryTagWeightStore {
    weights: RwLock<HashMap<String, TagWeight>>,
}

impl MemoryTagWeightStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weights(weights: impl IntoIterator<Item = TagWeight>) -> Self {
        let map = weights.into_iter().map(|w| (w.tag.clone(), w)).collect();
        Self {
            weights: RwLock::new(map),
        }
    }
}

#[async_trait]
impl TagWeightStore for MemoryTagWeightStore {
    async fn get(&self, tag: &str) -> Result<Option<TagWeight>> {
        Ok(self.weights.read().await.get(tag).cloned())
    }

    async fn set(&self, weight: &TagWeight) -> Result<()> {
        self.weights.write().await.insert(weight.tag.clone(), weight.clone());
        Ok(())
    }

    async fn remove(&self, tag: &str) -> Result<()> {
        self.weights.write().await.remove(tag);
        Ok(())
    }

    async fn get_all(&self) -> Result<HashMap<String, TagWeight>> {
        Ok(self.weights.read().await.clone())
    }
}

#[derive(Default)]
pub struct MemorySettingsStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<K: Into<String>, V: Into<String>>(values: impl IntoIterator<Item = (K, V)>) -> Self {
        let map = values.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self {
            values: RwLock::new(map),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.write().await.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryArticleStore {
    articles: RwLock<HashMap<ArticleId, Article>>,
}

impl MemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArticleStore for MemoryArticleStore {
    async fn upsert(&self, article: &Article) -> Result<()> {
        let mut articles = self.articles.write().await;
        match articles.get_mut(&article.id) {
            Some(existing) => {
                existing.title = article.title.clone();
                existing.url = article.url.clone();
                existing.tags = article.tags.clone();
                existing.score = article.score;
                existing.descendants = article.descendants;
                existing.fetched_at = article.fetched_at;
            }
            None => {
                articles.insert(article.id, article.clone());
            }
        }
        Ok(())
    }

    async fn get(&self, id: ArticleId) -> Result<Option<Article>> {
        Ok(self.articles.read().await.get(&id).cloned())
    }

    async fn mark_delivered(&self, id: ArticleId, at: DateTime<Utc>, message_ref: &str) -> Result<()> {
        let mut articles = self.articles.write().await;
        let article = articles.get_mut(&id).ok_or_else(|| anyhow!("article {id} is not stored"))?;
        article.delivered_at = Some(at);
        article.message_ref = Some(message_ref.to_owned());
        Ok(())
    }

    async fn mark_liked(&self, id: ArticleId) -> Result<()> {
        let mut articles = self.articles.write().await;
        let article = articles.get_mut(&id).ok_or_else(|| anyhow!("article {id} is not stored"))?;
        article.liked = true;
        Ok(())
    }

    async fn unmark_liked(&self, id: ArticleId) -> Result<()> {
        let mut articles = self.articles.write().await;
        let article = articles.get_mut(&id).ok_or_else(|| anyhow!("article {id} is not stored"))?;
        article.liked = false;
        Ok(())
    }

    async fn delivered_ids(&self) -> Result<HashSet<ArticleId>> {
        let articles = self.articles.read().await;
        Ok(articles
            .values()
            .filter(|article| article.delivered_at.is_some())
            .map(|article| article.id)
            .collect())
    }
}

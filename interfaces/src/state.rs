use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::defs::{Article, ArticleId, ArticleStore, SettingsStore, TagWeight, TagWeightStore};

/// SQLite-backed implementation of every durable store the engine needs.
///
/// The pool is owned by the hosting process; clone the state freely, the
/// clones share one pool.
#[derive(Clone)]
pub struct SqliteState {
    pool: SqlitePool,
}

impl SqliteState {
    pub async fn connect(database_url: &str) -> Result<Self> {
        // A single connection keeps `sqlite::memory:` databases coherent and
        // serializes writers, which sqlite would do anyway.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .with_context(|| format!("failed to open sqlite database {database_url}"))?;
        let state = Self { pool };
        state.setup_schema().await?;
        info!("Opened digest database: {}", database_url);
        Ok(state)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn setup_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tag_weights (
                tag TEXT PRIMARY KEY,
                weight REAL NOT NULL,
                observation_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                url TEXT,
                tags TEXT NOT NULL,
                score INTEGER NOT NULL,
                descendants INTEGER NOT NULL,
                fetched_at TEXT NOT NULL,
                delivered_at TEXT,
                message_ref TEXT,
                liked INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn set_liked(&self, id: ArticleId, liked: bool) -> Result<()> {
        let result = sqlx::query("UPDATE articles SET liked = ? WHERE id = ?")
            .bind(liked as i64)
            .bind(id as i64)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("article {id} is not stored"));
        }
        Ok(())
    }
}

fn tag_weight_from_row(row: &SqliteRow) -> Result<TagWeight> {
    Ok(TagWeight {
        tag: row.try_get("tag")?,
        weight: row.try_get("weight")?,
        count: row.try_get::<i64, _>("observation_count")?.max(0) as u64,
    })
}

fn article_from_row(row: &SqliteRow) -> Result<Article> {
    let tags_json: String = row.try_get("tags")?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).context("malformed tags column")?;

    Ok(Article {
        id: row.try_get::<i64, _>("id")? as u64,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        tags,
        score: row.try_get::<i64, _>("score")?.max(0) as u64,
        descendants: row.try_get::<i64, _>("descendants")?.max(0) as u64,
        fetched_at: row.try_get::<DateTime<Utc>, _>("fetched_at")?,
        delivered_at: row.try_get::<Option<DateTime<Utc>>, _>("delivered_at")?,
        message_ref: row.try_get("message_ref")?,
        liked: row.try_get::<i64, _>("liked")? != 0,
    })
}

#[async_trait]
impl TagWeightStore for SqliteState {
    async fn get(&self, tag: &str) -> Result<Option<TagWeight>> {
        let row = sqlx::query("SELECT tag, weight, observation_count FROM tag_weights WHERE tag = ?")
            .bind(tag)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(tag_weight_from_row).transpose()
    }

    async fn set(&self, weight: &TagWeight) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tag_weights (tag, weight, observation_count)
            VALUES (?, ?, ?)
            ON CONFLICT (tag) DO UPDATE SET
                weight = EXCLUDED.weight,
                observation_count = EXCLUDED.observation_count
            "#,
        )
        .bind(&weight.tag)
        .bind(weight.weight)
        .bind(weight.count as i64)
        .execute(&self.pool)
        .await?;

        debug!("Stored weight {:.4} for tag {}", weight.weight, weight.tag);
        Ok(())
    }

    async fn remove(&self, tag: &str) -> Result<()> {
        sqlx::query("DELETE FROM tag_weights WHERE tag = ?")
            .bind(tag)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_all(&self) -> Result<HashMap<String, TagWeight>> {
        let rows = sqlx::query("SELECT tag, weight, observation_count FROM tag_weights")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| tag_weight_from_row(row).map(|w| (w.tag.clone(), w)))
            .collect()
    }
}

#[async_trait]
impl SettingsStore for SqliteState {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(r.try_get("value")?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value)
            VALUES (?, ?)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ArticleStore for SqliteState {
    async fn upsert(&self, article: &Article) -> Result<()> {
        let tags = serde_json::to_string(&article.tags)?;

        sqlx::query(
            r#"
            INSERT INTO articles (id, title, url, tags, score, descendants, fetched_at, delivered_at, message_ref, liked)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                url = EXCLUDED.url,
                tags = EXCLUDED.tags,
                score = EXCLUDED.score,
                descendants = EXCLUDED.descendants,
                fetched_at = EXCLUDED.fetched_at
            "#,
        )
        .bind(article.id as i64)
        .bind(&article.title)
        .bind(&article.url)
        .bind(tags)
        .bind(article.score as i64)
        .bind(article.descendants as i64)
        .bind(article.fetched_at)
        .bind(article.delivered_at)
        .bind(&article.message_ref)
        .bind(article.liked as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: ArticleId) -> Result<Option<Article>> {
        let row = sqlx::query("SELECT * FROM articles WHERE id = ?")
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(article_from_row).transpose()
    }

    async fn mark_delivered(&self, id: ArticleId, at: DateTime<Utc>, message_ref: &str) -> Result<()> {
        let result = sqlx::query("UPDATE articles SET delivered_at = ?, message_ref = ? WHERE id = ?")
            .bind(at)
            .bind(message_ref)
            .bind(id as i64)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("article {id} is not stored"));
        }
        Ok(())
    }

    async fn mark_liked(&self, id: ArticleId) -> Result<()> {
        self.set_liked(id, true).await
    }

    async fn unmark_liked(&self, id: ArticleId) -> Result<()> {
        self.set_liked(id, false).await
    }

    async fn delivered_ids(&self) -> Result<HashSet<ArticleId>> {
        let rows = sqlx::query("SELECT id FROM articles WHERE delivered_at IS NOT NULL")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| -> Result<u64> { Ok(r.try_get::<i64, _>("id")? as u64) })
            .collect()
    }
}

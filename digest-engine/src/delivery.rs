use crate::types::{Article, DigestSink};
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

/// Sink that "delivers" by logging each article. Stands in for a chat
/// platform when running locally.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DigestSink for LogSink {
    async fn deliver(&self, position: usize, article: &Article) -> anyhow::Result<String> {
        let message_ref = format!("log-{}", Uuid::new_v4());
        info!(
            "#{} [{}] {} ({}) score={} comments={} tags={}",
            position + 1,
            article.id,
            article.title,
            article.url.as_deref().unwrap_or("no link"),
            article.score,
            article.descendants,
            article.tags.join(",")
        );
        Ok(message_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn returns_distinct_message_refs() {
        let article = Article {
            id: 7,
            title: "Story".to_string(),
            url: None,
            tags: vec!["rust".to_string()],
            score: 1,
            descendants: 0,
            fetched_at: Utc::now(),
            delivered_at: None,
            message_ref: None,
            liked: false,
        };
        let sink = LogSink::new();

        let first = sink.deliver(0, &article).await.unwrap();
        let second = sink.deliver(0, &article).await.unwrap();
        assert!(first.starts_with("log-"));
        assert_ne!(first, second);
    }
}

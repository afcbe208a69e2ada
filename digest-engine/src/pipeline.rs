use crate::preference::PreferenceModel;
use crate::ranking::{RankedArticle, RankingEngine};
use crate::settings::SettingsManager;
use crate::types::{
    Article, ArticleId, ArticleStore, ContentFeed, CycleReport, DigestError, DigestSink, FeedbackDirection,
    FeedbackEvent, Result,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CANDIDATE_LIMIT: usize = 100;

/// One digest cycle end to end: decay, fetch, rank, deliver. Also the entry
/// point for feedback flowing back into the preference model.
pub struct DigestPipeline {
    feed: Arc<dyn ContentFeed>,
    articles: Arc<dyn ArticleStore>,
    sink: Arc<dyn DigestSink>,
    preferences: Arc<PreferenceModel>,
    settings: Arc<SettingsManager>,
    candidate_limit: usize,
    /// Held from the liked check through the tag boost.
    feedback: Mutex<()>,
}

impl DigestPipeline {
    pub fn new(
        feed: Arc<dyn ContentFeed>,
        articles: Arc<dyn ArticleStore>,
        sink: Arc<dyn DigestSink>,
        preferences: Arc<PreferenceModel>,
        settings: Arc<SettingsManager>,
    ) -> Self {
        Self {
            feed,
            articles,
            sink,
            preferences,
            settings,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
            feedback: Mutex::new(()),
        }
    }

    pub fn with_candidate_limit(mut self, limit: usize) -> Self {
        self.candidate_limit = limit;
        self
    }

    pub fn preferences(&self) -> &Arc<PreferenceModel> {
        &self.preferences
    }

    pub fn settings(&self) -> &Arc<SettingsManager> {
        &self.settings
    }

    /// Runs one cycle. Decay happens before ranking; a decay or fetch
    /// failure aborts the cycle. Individual delivery failures are counted
    /// and the remaining articles still go out.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let article_count = self.settings.article_count().await?;
        self.preferences
            .reconfigure(self.settings.preference_config().await?)
            .await;

        self.preferences.apply_decay().await?;

        let fetched_at = Utc::now();
        let items = self.feed.fetch_candidates(self.candidate_limit).await?;
        let mut report = CycleReport {
            candidates: items.len(),
            ..Default::default()
        };

        let delivered = self.articles.delivered_ids().await?;
        let mut fresh = Vec::with_capacity(items.len());
        for item in items {
            let article = Article::from_feed_item(item, fetched_at);
            self.articles.upsert(&article).await?;
            if delivered.contains(&article.id) {
                report.already_delivered += 1;
            } else {
                fresh.push(article);
            }
        }

        let weights = self.preferences.weights().await?;
        let ranked = RankingEngine::rank(fresh, &weights);
        let selected: Vec<RankedArticle> = ranked.into_iter().take(article_count).collect();
        debug!(
            "Selected {} of {} candidates ({} already delivered)",
            selected.len(),
            report.candidates,
            report.already_delivered
        );

        for (position, ranked) in selected.iter().enumerate() {
            let article = &ranked.article;
            let message_ref = match self.sink.deliver(position, article).await {
                Ok(message_ref) => message_ref,
                Err(e) => {
                    warn!("Failed to deliver article {}: {}", article.id, e);
                    report.failed_deliveries += 1;
                    continue;
                }
            };

            match self.articles.mark_delivered(article.id, Utc::now(), &message_ref).await {
                Ok(()) => report.delivered.push(article.id),
                Err(e) => {
                    error!("Delivered article {} but could not record it: {}", article.id, e);
                    report.failed_deliveries += 1;
                }
            }
        }

        info!(
            "Digest cycle from {} delivered {} articles ({} failed, {} candidates)",
            self.feed.source_name(),
            report.delivered.len(),
            report.failed_deliveries,
            report.candidates
        );
        Ok(report)
    }

    /// Flags the article as liked, then applies a like to every tag of it.
    /// Liking an already-liked article changes nothing. If the boost fails
    /// the flag is cleared again, so a retry starts from a clean state.
    pub async fn handle_feedback(&self, event: FeedbackEvent) -> Result<()> {
        let _feedback = self.feedback.lock().await;

        let article = self
            .articles
            .get(event.article_id)
            .await?
            .ok_or(DigestError::ArticleNotFound { id: event.article_id })?;

        match event.direction {
            FeedbackDirection::Like => {
                if article.liked {
                    debug!("Article {} already liked", article.id);
                    return Ok(());
                }
                let config = self.settings.preference_config().await?;
                self.preferences.reconfigure(config).await;

                self.articles.mark_liked(article.id).await?;
                if let Err(e) = self.preferences.apply_like(&article.tags).await {
                    return Err(self.undo_like(article.id, article.tags.len(), e).await);
                }
                info!("Recorded like for article {} ({} tags)", article.id, article.tags.len());
            }
        }
        Ok(())
    }

    async fn undo_like(&self, id: ArticleId, tag_count: usize, cause: DigestError) -> DigestError {
        match self.articles.unmark_liked(id).await {
            Ok(()) => {
                warn!("Like for article {} not applied: {}", id, cause);
                cause
            }
            Err(e) => {
                error!("Article {} stays flagged liked without its boost: {}", id, e);
                DigestError::PartialUpdate {
                    applied: 0,
                    total: tag_count,
                    reason: format!("{}; clearing liked flag failed: {}", cause, e),
                }
            }
        }
    }
}

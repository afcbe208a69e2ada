use crate::types::Article;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

/// Share of the final score taken by the learned tag preferences.
pub const TAG_BLEND: f64 = 0.7;
/// Share of the final score taken by raw popularity.
pub const POPULARITY_BLEND: f64 = 0.3;
/// Weight assumed for a tag the user has never interacted with.
pub const UNSEEN_TAG_WEIGHT: f64 = 0.0;

/// An article together with the scores that placed it.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedArticle {
    pub article: Article,
    pub tag_score: f64,
    pub popularity_score: f64,
    pub final_score: f64,
}

/// Pure scoring and ordering of candidate articles against tag weights.
pub struct RankingEngine;

impl RankingEngine {
    /// Scores every article and sorts by final score, highest first.
    ///
    /// Equal scores are ordered by ascending article id so the result never
    /// depends on input order.
    pub fn rank<I>(articles: I, weights: &HashMap<String, f64>) -> Vec<RankedArticle>
    where
        I: IntoIterator<Item = Article>,
    {
        let mut ranked: Vec<RankedArticle> = articles
            .into_iter()
            .map(|article| Self::score(article, weights))
            .collect();

        ranked.sort_by(compare_ranked);

        debug!("Ranked {} articles against {} tag weights", ranked.len(), weights.len());
        ranked
    }

    pub fn score(article: Article, weights: &HashMap<String, f64>) -> RankedArticle {
        let tag_score = tag_score(&article.tags, weights);
        let popularity_score = popularity_score(article.score);
        let final_score = TAG_BLEND * tag_score + POPULARITY_BLEND * popularity_score;

        RankedArticle {
            article,
            tag_score,
            popularity_score,
            final_score,
        }
    }
}

fn compare_ranked(a: &RankedArticle, b: &RankedArticle) -> Ordering {
    b.final_score
        .total_cmp(&a.final_score)
        .then_with(|| a.article.id.cmp(&b.article.id))
}

pub fn tag_score(tags: &[String], weights: &HashMap<String, f64>) -> f64 {
    tags.iter()
        .map(|tag| weights.get(tag).copied().unwrap_or(UNSEEN_TAG_WEIGHT))
        .sum()
}

/// `log10(score + 1)`; zero popularity maps to zero.
pub fn popularity_score(score: u64) -> f64 {
    (score as f64 + 1.0).log10()
}

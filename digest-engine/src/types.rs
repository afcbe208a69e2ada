use serde::{Deserialize, Serialize};

pub use interfaces::defs::{
    Article, ArticleId, ArticleStore, ContentFeed, DigestSink, FeedItem, FeedbackDirection,
    FeedbackEvent, SettingsEntry, SettingsStore, TagWeight, TagWeightStore,
};

/// Tunables for the preference model, read from settings once per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreferenceConfig {
    pub decay_rate: f64,
    pub min_weight: f64,
    pub like_boost: f64,
}

impl Default for PreferenceConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.02,
            min_weight: 0.1,
            like_boost: 0.2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HackerNewsConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_millis: u64,
}

impl Default for HackerNewsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://hacker-news.firebaseio.com/v0/".to_string(),
            user_agent: "Digest-Engine/1.0".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_millis: 500,
        }
    }
}

/// Outcome of one digest cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub candidates: usize,
    pub already_delivered: usize,
    pub delivered: Vec<ArticleId>,
    pub failed_deliveries: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid time format '{0}': expected HH:MM")]
    InvalidTimeFormat(String),

    #[error("Time out of range: {hour:02}:{minute:02}")]
    TimeOutOfRange { hour: u32, minute: u32 },

    #[error("Scheduler has been stopped")]
    SchedulerStopped,

    #[error("Invalid value for setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("Unknown setting: {0}")]
    UnknownSetting(String),

    #[error("Article not found: {id}")]
    ArticleNotFound { id: ArticleId },

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("Partial update: {applied} of {total} tag writes applied and could not be reverted: {reason}")]
    PartialUpdate {
        applied: usize,
        total: usize,
        reason: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, DigestError>;

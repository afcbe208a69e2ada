use crate::trigger::{parse_timezone, TimeOfDay};
use crate::types::{DigestError, PreferenceConfig, Result, SettingsEntry, SettingsStore};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const DIGEST_TIME: &str = "digest_time";
pub const TIMEZONE: &str = "timezone";
pub const TAG_DECAY_RATE: &str = "tag_decay_rate";
pub const MIN_TAG_WEIGHT: &str = "min_tag_weight";
pub const TAG_BOOST_ON_LIKE: &str = "tag_boost_on_like";
pub const ARTICLE_COUNT: &str = "article_count";

pub const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    (DIGEST_TIME, "09:00"),
    (TIMEZONE, "UTC"),
    (TAG_DECAY_RATE, "0.02"),
    (MIN_TAG_WEIGHT, "0.1"),
    (TAG_BOOST_ON_LIKE, "0.2"),
    (ARTICLE_COUNT, "30"),
];

/// In-memory view of named settings, written through to durable storage.
///
/// The durable store is authoritative: defaults are only written for keys
/// it does not hold yet.
pub struct SettingsManager {
    store: Arc<dyn SettingsStore>,
    cache: RwLock<HashMap<String, SettingsEntry>>,
}

impl SettingsManager {
    pub async fn load(store: Arc<dyn SettingsStore>, defaults: &[(&str, &str)]) -> Result<Self> {
        let mut cache = HashMap::new();

        for (key, default) in defaults {
            let value = match store.get(key).await? {
                Some(stored) => {
                    if let Err(e) = validate_setting(key, &stored) {
                        warn!("Stored value for {} is not usable: {}", key, e);
                    }
                    debug!("Adopted stored setting {}={}", key, stored);
                    stored
                }
                None => {
                    store.set(key, default).await?;
                    info!("Initialized setting {} with default {}", key, default);
                    default.to_string()
                }
            };

            cache.insert(
                key.to_string(),
                SettingsEntry {
                    key: key.to_string(),
                    value,
                    default: default.to_string(),
                },
            );
        }

        Ok(Self {
            store,
            cache: RwLock::new(cache),
        })
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.cache.read().await.get(key).map(|entry| entry.value.clone())
    }

    pub async fn entry(&self, key: &str) -> Option<SettingsEntry> {
        self.cache.read().await.get(key).cloned()
    }

    /// Validates, writes to the durable store, then updates the cache. A
    /// failed write leaves the cache untouched.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_setting(key, value)?;

        let mut cache = self.cache.write().await;
        let entry = cache
            .get_mut(key)
            .ok_or_else(|| DigestError::UnknownSetting(key.to_string()))?;

        self.store.set(key, value).await?;
        entry.value = value.to_string();

        info!("Setting {} updated to {}", key, value);
        Ok(())
    }

    /// Restores the default recorded at load time.
    pub async fn reset(&self, key: &str) -> Result<()> {
        let default = self
            .entry(key)
            .await
            .map(|entry| entry.default)
            .ok_or_else(|| DigestError::UnknownSetting(key.to_string()))?;
        self.set(key, &default).await
    }

    pub async fn snapshot(&self) -> Vec<SettingsEntry> {
        let mut entries: Vec<SettingsEntry> = self.cache.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Typed read of a cached value. Values that fail validation, including
    /// ones adopted from the store at load, are reported as errors.
    pub async fn get_parsed<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let value = self
            .get(key)
            .await
            .ok_or_else(|| DigestError::UnknownSetting(key.to_string()))?;
        validate_setting(key, &value)?;
        value.trim().parse::<T>().map_err(|e| DigestError::InvalidSetting {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn preference_config(&self) -> Result<PreferenceConfig> {
        Ok(PreferenceConfig {
            decay_rate: self.get_parsed(TAG_DECAY_RATE).await?,
            min_weight: self.get_parsed(MIN_TAG_WEIGHT).await?,
            like_boost: self.get_parsed(TAG_BOOST_ON_LIKE).await?,
        })
    }

    pub async fn article_count(&self) -> Result<usize> {
        self.get_parsed(ARTICLE_COUNT).await
    }
}

/// Rejects values the engine could not use. Keys without rules pass.
pub fn validate_setting(key: &str, value: &str) -> Result<()> {
    let invalid = |reason: String| DigestError::InvalidSetting {
        key: key.to_string(),
        reason,
    };

    match key {
        DIGEST_TIME => {
            TimeOfDay::parse(value)?;
        }
        TIMEZONE => {
            parse_timezone(value)?;
        }
        TAG_DECAY_RATE => {
            let rate = parse_finite(value).map_err(invalid)?;
            if !(0.0..=1.0).contains(&rate) {
                return Err(invalid(format!("{} is outside 0..1", rate)));
            }
        }
        MIN_TAG_WEIGHT | TAG_BOOST_ON_LIKE => {
            parse_finite(value).map_err(invalid)?;
        }
        ARTICLE_COUNT => {
            let count = value
                .trim()
                .parse::<usize>()
                .map_err(|e| invalid(e.to_string()))?;
            if count == 0 {
                return Err(invalid("must be at least 1".to_string()));
            }
        }
        _ => {}
    }
    Ok(())
}

fn parse_finite(value: &str) -> std::result::Result<f64, String> {
    let number = value.trim().parse::<f64>().map_err(|e| e.to_string())?;
    if number.is_finite() {
        Ok(number)
    } else {
        Err(format!("{} is not a finite number", value))
    }
}

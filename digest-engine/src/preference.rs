use crate::types::{DigestError, PreferenceConfig, Result, TagWeight, TagWeightStore};
use interfaces::defs::dedup_tags;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Learns tag weights from likes and fades them with per-cycle decay.
///
/// Every mutation and every read of the weight table goes through one mutex,
/// so a like racing a scheduled decay cannot lose either update. The mutex
/// also guards the current [`PreferenceConfig`].
pub struct PreferenceModel {
    store: Arc<dyn TagWeightStore>,
    config: Mutex<PreferenceConfig>,
}

/// One pending write: the entry as it was before (if any) and what replaces it.
struct TagWrite {
    previous: Option<TagWeight>,
    next: TagWeight,
}

impl PreferenceModel {
    pub fn new(store: Arc<dyn TagWeightStore>, config: PreferenceConfig) -> Self {
        Self {
            store,
            config: Mutex::new(config),
        }
    }

    pub async fn reconfigure(&self, config: PreferenceConfig) {
        let mut current = self.config.lock().await;
        if *current != config {
            info!(
                "Preference config changed: decay_rate={} min_weight={} like_boost={}",
                config.decay_rate, config.min_weight, config.like_boost
            );
            *current = config;
        }
    }

    pub async fn config(&self) -> PreferenceConfig {
        *self.config.lock().await
    }

    /// Adds the like boost to every tag of the liked article.
    ///
    /// Tags without a stored weight start from zero. Either every tag is
    /// updated or none is; if a failed write cannot be reverted the error is
    /// [`DigestError::PartialUpdate`].
    pub async fn apply_like(&self, tags: &[String]) -> Result<Vec<TagWeight>> {
        let config = self.config.lock().await;
        let tags = dedup_tags(tags.to_vec());

        let mut writes = Vec::with_capacity(tags.len());
        for tag in tags {
            let previous = self.store.get(&tag).await?;
            let (weight, count) = previous
                .as_ref()
                .map(|w| (w.weight, w.count))
                .unwrap_or((0.0, 0));
            let next = TagWeight {
                tag,
                weight: weight + config.like_boost,
                count: count.saturating_add(1),
            };
            writes.push(TagWrite { previous, next });
        }

        self.write_all(&writes).await?;

        debug!("Applied like boost {} to {} tags", config.like_boost, writes.len());
        Ok(writes.into_iter().map(|w| w.next).collect())
    }

    /// Multiplies every stored weight by `1 - decay_rate`, never going below
    /// the floor. Entries are never removed and observation counts are kept.
    ///
    /// Returns the number of tags whose weight changed.
    pub async fn apply_decay(&self) -> Result<usize> {
        let config = self.config.lock().await;
        let all = self.store.get_all().await?;

        let mut writes: Vec<TagWrite> = all
            .into_values()
            .filter_map(|previous| {
                let decayed = decay_weight(previous.weight, config.decay_rate, config.min_weight);
                if decayed == previous.weight {
                    return None;
                }
                let next = TagWeight {
                    weight: decayed,
                    ..previous.clone()
                };
                Some(TagWrite {
                    previous: Some(previous),
                    next,
                })
            })
            .collect();
        writes.sort_by(|a, b| a.next.tag.cmp(&b.next.tag));

        self.write_all(&writes).await?;

        info!(
            "Decayed {} tag weights (rate {}, floor {})",
            writes.len(),
            config.decay_rate,
            config.min_weight
        );
        Ok(writes.len())
    }

    /// Current tag weights, consistent with respect to in-flight mutations.
    pub async fn weights(&self) -> Result<HashMap<String, f64>> {
        let _guard = self.config.lock().await;
        let all = self.store.get_all().await?;
        Ok(all.into_iter().map(|(tag, w)| (tag, w.weight)).collect())
    }

    /// Full entries including observation counts, for diagnostics.
    pub async fn entries(&self) -> Result<Vec<TagWeight>> {
        let _guard = self.config.lock().await;
        let mut entries: Vec<TagWeight> = self.store.get_all().await?.into_values().collect();
        entries.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.tag.cmp(&b.tag)));
        Ok(entries)
    }

    async fn write_all(&self, writes: &[TagWrite]) -> Result<()> {
        for (index, write) in writes.iter().enumerate() {
            if let Err(e) = self.store.set(&write.next).await {
                warn!(
                    "Tag write failed for {} after {} of {} writes: {}",
                    write.next.tag,
                    index,
                    writes.len(),
                    e
                );
                return match self.revert(&writes[..index]).await {
                    Ok(()) => Err(DigestError::Storage(e)),
                    Err(revert_error) => Err(DigestError::PartialUpdate {
                        applied: index,
                        total: writes.len(),
                        reason: format!("{}; revert failed: {}", e, revert_error),
                    }),
                };
            }
        }
        Ok(())
    }

    async fn revert(&self, applied: &[TagWrite]) -> anyhow::Result<()> {
        for write in applied.iter().rev() {
            match &write.previous {
                Some(previous) => self.store.set(previous).await?,
                None => self.store.remove(&write.next.tag).await?,
            }
        }
        Ok(())
    }
}

/// `max(floor, weight * (1 - rate))`.
pub fn decay_weight(weight: f64, rate: f64, floor: f64) -> f64 {
    (weight * (1.0 - rate)).max(floor)
}

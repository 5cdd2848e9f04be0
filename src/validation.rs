//! Memoized "is this instrument fetchable" checks

use crate::core::cache::KeyValueCollection;
use crate::core::clock::Clock;
use crate::core::error::{Error, Result};
use crate::core::model::Category;
use crate::core::repository::PortfolioRepository;
use crate::registry::SourceRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const CACHE_KEY_PREFIX: &str = "validated_holding";
pub const VALID_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const INVALID_TTL: Duration = Duration::from_secs(2 * 60 * 60);

pub fn cache_key(category_id: &str, code: &str) -> String {
    format!("{CACHE_KEY_PREFIX}:{category_id}:{code}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCacheEntry {
    pub name: String,
    pub code: String,
    pub category_id: String,
    pub category_name: String,
    pub valid: bool,
    pub cached_at: DateTime<Utc>,
}

impl ValidationCacheEntry {
    pub fn ttl(&self) -> Duration {
        if self.valid { VALID_TTL } else { INVALID_TTL }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl())
            .ok()
            .and_then(|ttl| self.cached_at.checked_add_signed(ttl))
            .unwrap_or(self.cached_at)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }
}

/// The holding as it would be created once validated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldingDraft {
    pub name: String,
    pub code: String,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holding: Option<HoldingDraft>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationStats {
    pub key_pattern: String,
    pub valid_ttl_secs: u64,
    pub invalid_ttl_secs: u64,
    pub description: String,
}

/// Remembers whether `(category, code)` pairs are fetchable, with a shorter memory for failures.
///
/// An unreachable cache store degrades to always-miss: lookups fall through to the provider and
/// writes are logged and dropped.
pub struct ValidationCache {
    cache: Arc<dyn KeyValueCollection>,
    registry: Arc<SourceRegistry>,
    repository: Arc<dyn PortfolioRepository>,
    clock: Arc<dyn Clock>,
}

impl ValidationCache {
    pub fn new(
        cache: Arc<dyn KeyValueCollection>,
        registry: Arc<SourceRegistry>,
        repository: Arc<dyn PortfolioRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache,
            registry,
            repository,
            clock,
        }
    }

    /// Validates against a known category, using `label` (usually the group name) before the
    /// category name to pick the price source.
    pub async fn validate_with_category(
        &self,
        category: &Category,
        label: Option<&str>,
        name: &str,
        code: &str,
        quantity: Option<f64>,
    ) -> Result<ValidationOutcome> {
        let code = code.trim();
        let key = cache_key(&category.id, code);
        let draft = HoldingDraft {
            name: name.trim().to_string(),
            code: code.to_string(),
            quantity: quantity.filter(|q| *q > 0.0).unwrap_or(1.0),
        };

        if let Some(entry) = self.lookup(&key).await {
            debug!(key = %key, valid = entry.valid, "Validation served from cache");
            return Ok(outcome(entry.valid, draft));
        }

        let valid = self.check_source(category, label, code).await;
        let entry = ValidationCacheEntry {
            name: draft.name.clone(),
            code: code.to_string(),
            category_id: category.id.clone(),
            category_name: category.name.clone(),
            valid,
            cached_at: self.clock.now(),
        };
        self.remember(&key, &entry).await;

        info!(code, category = %category.name, valid, "Validated holding");
        Ok(outcome(valid, draft))
    }

    /// Validates a holding for an existing group.
    pub async fn validate_in_group(
        &self,
        group_id: &str,
        name: &str,
        code: &str,
        quantity: Option<f64>,
    ) -> Result<ValidationOutcome> {
        let view = self
            .repository
            .find_group(group_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                entity: "Group",
                id: group_id.to_string(),
            })?;
        self.validate_with_category(&view.category, Some(&view.group.name), name, code, quantity)
            .await
    }

    /// Validates a holding for a category, optionally naming the group it is meant for.
    pub async fn validate_with_category_id(
        &self,
        category_id: &str,
        group_name: Option<&str>,
        name: &str,
        code: &str,
        quantity: Option<f64>,
    ) -> Result<ValidationOutcome> {
        let category = self
            .repository
            .find_category(category_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                entity: "Category",
                id: category_id.to_string(),
            })?;
        self.validate_with_category(&category, group_name, name, code, quantity)
            .await
    }

    /// The live entry for the pair, if any.
    pub async fn get(&self, category_id: &str, code: &str) -> Result<Option<ValidationCacheEntry>> {
        let Some(raw) = self.cache.get(&cache_key(category_id, code.trim())).await? else {
            return Ok(None);
        };
        let entry: ValidationCacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Unreadable validation entry for {}: {}", code, e);
                return Ok(None);
            }
        };
        Ok(entry.is_fresh(self.clock.now()).then_some(entry))
    }

    /// Forgets the pair. Clearing an absent entry succeeds.
    pub async fn clear(&self, category_id: &str, code: &str) -> Result<()> {
        let key = cache_key(category_id, code.trim());
        self.cache.remove(&key).await?;
        info!(key = %key, "Cleared validation entry");
        Ok(())
    }

    pub fn stats(&self) -> ValidationStats {
        ValidationStats {
            key_pattern: format!("{CACHE_KEY_PREFIX}:{{categoryId}}:{{code}}"),
            valid_ttl_secs: VALID_TTL.as_secs(),
            invalid_ttl_secs: INVALID_TTL.as_secs(),
            description: "Valid holdings are remembered for 24 hours, invalid ones for 2 hours"
                .to_string(),
        }
    }

    async fn lookup(&self, key: &str) -> Option<ValidationCacheEntry> {
        let raw = match self.cache.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "Validation cache unavailable, treating as miss");
                return None;
            }
        };
        match serde_json::from_slice::<ValidationCacheEntry>(&raw) {
            Ok(entry) if entry.is_fresh(self.clock.now()) => Some(entry),
            Ok(_) => None,
            Err(e) => {
                debug!(key, error = %e, "Ignoring unreadable validation entry");
                None
            }
        }
    }

    async fn remember(&self, key: &str, entry: &ValidationCacheEntry) {
        let stored = match serde_json::to_vec(entry) {
            Ok(raw) => self.cache.put(key, &raw, Some(entry.ttl())).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = stored {
            warn!(key, error = %e, "Failed to cache validation result");
        }
    }

    async fn check_source(&self, category: &Category, label: Option<&str>, code: &str) -> bool {
        let labels = label.into_iter().chain([category.name.as_str()]);
        let source = match self.registry.resolve_any(labels) {
            Ok(source) => source,
            Err(e) => {
                info!(code, error = %e, "Holding cannot be priced");
                return false;
            }
        };

        match source.refresh(category, code).await {
            Ok(price) => {
                if let Err(e) = self
                    .repository
                    .record_last_price(&category.id, code, price)
                    .await
                {
                    warn!(code, error = %e, "Failed to record last known price");
                }
                true
            }
            Err(e) => {
                info!(code, error = %e, "Holding failed validation");
                false
            }
        }
    }
}

fn outcome(valid: bool, draft: HoldingDraft) -> ValidationOutcome {
    ValidationOutcome {
        is_valid: valid,
        holding: valid.then_some(draft),
    }
}

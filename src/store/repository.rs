use crate::core::clock::Clock;
use crate::core::error::{Error, Result};
use crate::core::model::{Category, Group, GroupView, Holding, HoldingView, Instrument, Snapshot};
use crate::core::repository::PortfolioRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

fn read<T: DeserializeOwned>(partition: &PartitionHandle, key: &str) -> Result<Option<T>> {
    match partition.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        None => Ok(None),
    }
}

fn write<T: Serialize>(partition: &PartitionHandle, key: &str, value: &T) -> Result<()> {
    partition.insert(key, serde_json::to_vec(value)?)?;
    Ok(())
}

fn read_all<T: DeserializeOwned>(partition: &PartitionHandle) -> Result<Vec<T>> {
    partition
        .iter()
        .map(|item| {
            let (_, raw) = item?;
            Ok(serde_json::from_slice(&raw)?)
        })
        .collect()
}

// NUL never occurs in an id, so one id can never be a key prefix of another
const KEY_SEPARATOR: char = '\0';

fn instrument_key(category_id: &str, code: &str) -> String {
    format!("{category_id}{KEY_SEPARATOR}{code}")
}

fn snapshot_prefix(holding_id: &str) -> String {
    format!("{holding_id}{KEY_SEPARATOR}")
}

/// Zero-padded so that lexicographic key order is creation order.
fn snapshot_time_key(holding_id: &str, created_at: &DateTime<Utc>) -> String {
    format!(
        "{}{:020}",
        snapshot_prefix(holding_id),
        created_at.timestamp_micros().max(0)
    )
}

fn snapshot_key(snapshot: &Snapshot) -> String {
    format!(
        "{}{KEY_SEPARATOR}{}",
        snapshot_time_key(&snapshot.holding_id, &snapshot.created_at),
        snapshot.id
    )
}

fn truncate_to_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(at.timestamp_micros()).unwrap_or(at)
}

/// Repository over fjall partitions, one per record type.
pub struct FjallRepository {
    categories: PartitionHandle,
    groups: PartitionHandle,
    holdings: PartitionHandle,
    instruments: PartitionHandle,
    snapshots: PartitionHandle,
    clock: Arc<dyn Clock>,
    snapshot_writes: Mutex<()>,
    _keyspace: Keyspace,
}

impl FjallRepository {
    pub fn new(keyspace: &Keyspace, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let open = |name: &str| keyspace.open_partition(name, PartitionCreateOptions::default());
        Ok(Self {
            categories: open("categories")?,
            groups: open("groups")?,
            holdings: open("holdings")?,
            instruments: open("instruments")?,
            snapshots: open("snapshots")?,
            clock,
            snapshot_writes: Mutex::new(()),
            _keyspace: keyspace.clone(),
        })
    }

    fn latest_snapshot(&self, holding_id: &str) -> Result<Option<Snapshot>> {
        match self.snapshots.prefix(snapshot_prefix(holding_id)).next_back() {
            Some(item) => {
                let (_, raw) = item?;
                Ok(Some(serde_json::from_slice(&raw)?))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl PortfolioRepository for FjallRepository {
    async fn load_holdings(&self) -> Result<Vec<HoldingView>> {
        let categories: HashMap<String, Category> = read_all::<Category>(&self.categories)?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        let groups: HashMap<String, Group> = read_all::<Group>(&self.groups)?
            .into_iter()
            .map(|g| (g.id.clone(), g))
            .collect();

        let mut views = Vec::new();
        for holding in read_all::<Holding>(&self.holdings)? {
            let Some(group) = groups.get(&holding.group_id) else {
                warn!(holding = %holding.id, group = %holding.group_id, "Skipping holding with unknown group");
                continue;
            };
            let Some(category) = categories.get(&group.category_id) else {
                warn!(holding = %holding.id, category = %group.category_id, "Skipping holding with unknown category");
                continue;
            };
            views.push(HoldingView {
                group: group.clone(),
                category: category.clone(),
                holding,
            });
        }
        debug!("Loaded {} holdings", views.len());
        Ok(views)
    }

    async fn find_holding(&self, id: &str) -> Result<Option<Holding>> {
        read(&self.holdings, id)
    }

    async fn find_group(&self, id: &str) -> Result<Option<GroupView>> {
        let Some(group) = read::<Group>(&self.groups, id)? else {
            return Ok(None);
        };
        let category = read::<Category>(&self.categories, &group.category_id)?.ok_or_else(|| {
            Error::NotFound {
                entity: "Category",
                id: group.category_id.clone(),
            }
        })?;
        Ok(Some(GroupView { group, category }))
    }

    async fn find_category(&self, id: &str) -> Result<Option<Category>> {
        read(&self.categories, id)
    }

    async fn create_snapshot(
        &self,
        holding_id: &str,
        price: f64,
        quantity: f64,
    ) -> Result<Snapshot> {
        let _guard = self.snapshot_writes.lock().await;

        let mut created_at = truncate_to_micros(self.clock.now());
        if let Some(latest) = self.latest_snapshot(holding_id)? {
            if created_at <= latest.created_at {
                created_at = latest.created_at + chrono::Duration::microseconds(1);
            }
        }

        let snapshot = Snapshot {
            id: Uuid::new_v4().to_string(),
            holding_id: holding_id.to_string(),
            price,
            quantity,
            created_at,
        };
        write(&self.snapshots, &snapshot_key(&snapshot), &snapshot)?;
        Ok(snapshot)
    }

    async fn previous_snapshot(
        &self,
        holding_id: &str,
        before: &Snapshot,
    ) -> Result<Option<Snapshot>> {
        let start = snapshot_prefix(holding_id);
        let end = snapshot_time_key(holding_id, &before.created_at);
        match self.snapshots.range(start..end).next_back() {
            Some(item) => {
                let (_, raw) = item?;
                Ok(Some(serde_json::from_slice(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn snapshots(&self, holding_id: &str) -> Result<Vec<Snapshot>> {
        self.snapshots
            .prefix(snapshot_prefix(holding_id))
            .map(|item| {
                let (_, raw) = item?;
                Ok(serde_json::from_slice(&raw)?)
            })
            .collect()
    }

    async fn save_holding(&self, holding: &Holding) -> Result<()> {
        write(&self.holdings, &holding.id, holding)
    }

    async fn upsert_category(&self, category: &Category) -> Result<()> {
        write(&self.categories, &category.id, category)
    }

    async fn upsert_group(&self, group: &Group) -> Result<()> {
        write(&self.groups, &group.id, group)
    }

    async fn record_last_price(&self, category_id: &str, code: &str, price: f64) -> Result<()> {
        let instrument = Instrument {
            category_id: category_id.to_string(),
            code: code.to_string(),
            last_price: Some(price),
            updated_at: Some(self.clock.now()),
        };
        write(
            &self.instruments,
            &instrument_key(category_id, code),
            &instrument,
        )
    }

    async fn find_instrument(&self, category_id: &str, code: &str) -> Result<Option<Instrument>> {
        read(&self.instruments, &instrument_key(category_id, code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::store::open_keyspace;
    use chrono::TimeZone;
    use tempfile::{TempDir, tempdir};

    fn repository(clock: Arc<dyn Clock>) -> (TempDir, FjallRepository) {
        let dir = tempdir().unwrap();
        let keyspace = open_keyspace(dir.path()).unwrap();
        let repo = FjallRepository::new(&keyspace, clock).unwrap();
        (dir, repo)
    }

    fn category() -> Category {
        Category {
            id: "cat-crypto".into(),
            name: "Criptomonedas".into(),
            source_endpoint: "https://api.example.com/crypto".into(),
            currency: "USD".into(),
        }
    }

    fn group() -> Group {
        Group {
            id: "g1".into(),
            name: "MIS CRIPTOS".into(),
            category_id: "cat-crypto".into(),
        }
    }

    #[tokio::test]
    async fn test_load_holdings_attaches_group_and_category() {
        let (_dir, repo) = repository(Arc::new(ManualClock::new(Utc::now())));
        repo.upsert_category(&category()).await.unwrap();
        repo.upsert_group(&group()).await.unwrap();
        repo.save_holding(&Holding::new("h1", "Bitcoin", "BTC", "g1", 1.5))
            .await
            .unwrap();
        repo.save_holding(&Holding::new("orphan", "Lost", "XYZ", "missing", 1.0))
            .await
            .unwrap();

        let views = repo.load_holdings().await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].holding.code, "BTC");
        assert_eq!(views[0].group.name, "MIS CRIPTOS");
        assert_eq!(views[0].category.currency, "USD");
    }

    #[tokio::test]
    async fn test_find_group_with_category() {
        let (_dir, repo) = repository(Arc::new(ManualClock::new(Utc::now())));
        repo.upsert_category(&category()).await.unwrap();
        repo.upsert_group(&group()).await.unwrap();

        let view = repo.find_group("g1").await.unwrap().unwrap();
        assert_eq!(view.category, category());
        assert!(repo.find_group("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshots_are_append_only_and_strictly_ordered() {
        let start = Utc.with_ymd_and_hms(2024, 3, 3, 3, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let (_dir, repo) = repository(clock.clone());

        let first = repo.create_snapshot("h1", 100.0, 5.0).await.unwrap();
        // Same instant: the second snapshot is still strictly later
        let second = repo.create_snapshot("h1", 105.0, 5.0).await.unwrap();
        clock.advance(chrono::Duration::days(7));
        let third = repo.create_snapshot("h1", 110.0, 5.0).await.unwrap();
        repo.create_snapshot("h2", 1.0, 1.0).await.unwrap();

        assert!(first.created_at < second.created_at);
        assert!(second.created_at < third.created_at);

        let history = repo.snapshots("h1").await.unwrap();
        assert_eq!(history, vec![first.clone(), second.clone(), third.clone()]);

        let previous = repo.previous_snapshot("h1", &third).await.unwrap();
        assert_eq!(previous, Some(second.clone()));
        let previous = repo.previous_snapshot("h1", &first).await.unwrap();
        assert!(previous.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_history_does_not_leak_between_prefixed_ids() {
        let start = Utc.with_ymd_and_hms(2024, 3, 3, 3, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let (_dir, repo) = repository(clock.clone());

        repo.create_snapshot("h1:-b", 1.0, 1.0).await.unwrap();
        clock.advance(chrono::Duration::days(1));
        let latest = repo.create_snapshot("h1", 100.0, 1.0).await.unwrap();

        assert!(repo.previous_snapshot("h1", &latest).await.unwrap().is_none());
        assert_eq!(repo.snapshots("h1").await.unwrap(), vec![latest]);
        assert_eq!(repo.snapshots("h1:-b").await.unwrap().len(), 1);
        assert!(repo.snapshots("h").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_last_price_overwrites() {
        let (_dir, repo) = repository(Arc::new(ManualClock::new(Utc::now())));
        repo.record_last_price("cat-crypto", "BTC", 60000.0)
            .await
            .unwrap();
        repo.record_last_price("cat-crypto", "BTC", 61000.0)
            .await
            .unwrap();

        let instrument = repo
            .find_instrument("cat-crypto", "BTC")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instrument.last_price, Some(61000.0));
        repo.record_last_price("cat", "a:b", 1.0).await.unwrap();
        assert!(repo.find_instrument("cat:a", "b").await.unwrap().is_none());
        assert!(
            repo.find_instrument("cat-crypto", "ETH")
                .await
                .unwrap()
                .is_none()
        );
    }
}

use crate::core::error::Result;
use crate::core::model::{
    Category, Group, GroupView, Holding, HoldingView, Instrument, Snapshot,
};
use async_trait::async_trait;

/// Persistence collaborator for holdings, their groups and their snapshot history.
#[async_trait]
pub trait PortfolioRepository: Send + Sync {
    /// All holdings with group and category attached. Holdings whose group or category is
    /// missing are skipped.
    async fn load_holdings(&self) -> Result<Vec<HoldingView>>;

    async fn find_holding(&self, id: &str) -> Result<Option<Holding>>;

    async fn find_group(&self, id: &str) -> Result<Option<GroupView>>;

    async fn find_category(&self, id: &str) -> Result<Option<Category>>;

    /// Appends a snapshot. Creation timestamps are strictly increasing per holding.
    async fn create_snapshot(&self, holding_id: &str, price: f64, quantity: f64)
    -> Result<Snapshot>;

    /// The most recent snapshot of the holding created before `before`.
    async fn previous_snapshot(&self, holding_id: &str, before: &Snapshot)
    -> Result<Option<Snapshot>>;

    /// Snapshot history, oldest first.
    async fn snapshots(&self, holding_id: &str) -> Result<Vec<Snapshot>>;

    async fn save_holding(&self, holding: &Holding) -> Result<()>;

    async fn upsert_category(&self, category: &Category) -> Result<()>;

    async fn upsert_group(&self, group: &Group) -> Result<()>;

    /// Overwrites the instrument's last known price. Last write wins.
    async fn record_last_price(&self, category_id: &str, code: &str, price: f64) -> Result<()>;

    async fn find_instrument(&self, category_id: &str, code: &str) -> Result<Option<Instrument>>;
}

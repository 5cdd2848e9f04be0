//! Domain records persisted by the repository

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An investment category: where its prices come from and what currency they are in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub source_endpoint: String,
    pub currency: String,
}

/// A user-named group of holdings. The name doubles as the label used to pick a price source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub category_id: String,
}

/// Tradable asset identified by `(category_id, code)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub category_id: String,
    pub code: String,
    pub last_price: Option<f64>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub id: String,
    pub name: String,
    pub code: String,
    pub group_id: String,
    pub quantity: f64,
    pub earnings: Option<f64>,
    pub relative_earnings: Option<f64>,
}

impl Holding {
    pub fn new(id: &str, name: &str, code: &str, group_id: &str, quantity: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            code: code.to_string(),
            group_id: group_id.to_string(),
            quantity,
            earnings: None,
            relative_earnings: None,
        }
    }
}

/// Immutable price record for one holding at one valuation moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub holding_id: String,
    pub price: f64,
    pub quantity: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupView {
    pub group: Group,
    pub category: Category,
}

/// A holding with its owning group and category attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldingView {
    pub holding: Holding,
    pub group: Group,
    pub category: Category,
}

impl HoldingView {
    /// Labels tried, in order, when resolving the price source for this holding.
    pub fn source_labels(&self) -> [&str; 2] {
        [&self.group.name, &self.category.name]
    }
}

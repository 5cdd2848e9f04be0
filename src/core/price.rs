//! Pricing abstractions and core types

use crate::core::error::{Error, Result};
use crate::core::model::Category;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// The asset classes a price source can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[serde(rename = "cedears")]
    DepositaryReceipt,
    #[serde(rename = "stock")]
    Equity,
    Crypto,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::DepositaryReceipt,
        SourceKind::Equity,
        SourceKind::Crypto,
    ];

    /// Stable identifier used in configuration and diagnostics.
    pub fn id(&self) -> &'static str {
        match self {
            SourceKind::DepositaryReceipt => "cedears",
            SourceKind::Equity => "stock",
            SourceKind::Crypto => "crypto",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SourceKind::DepositaryReceipt => "CEDEARS",
            SourceKind::Equity => "ACCIONES",
            SourceKind::Crypto => "CRYPTO",
        }
    }
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl FromStr for SourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKind::ALL
            .into_iter()
            .find(|kind| kind.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnsupportedCategory(s.to_string()))
    }
}

/// Fetches the current price of a single instrument from one external provider.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Shapes the provider request for `code` from the category's endpoint template.
    fn build_request_target(&self, base_endpoint: &str, code: &str) -> String;

    /// Key under which a successful price is cached. Prices depend on the category's endpoint
    /// and currency, so the category id is part of the key.
    fn cache_key(&self, category: &Category, code: &str) -> String {
        format!("{}:{}", category.id, code.trim())
    }

    /// Fails closed: a price is returned only when the provider positively reported one.
    async fn fetch_price(&self, category: &Category, code: &str) -> Result<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_round_trip_ids() {
        for kind in SourceKind::ALL {
            assert_eq!(kind.id().parse::<SourceKind>().unwrap(), kind);
        }
        assert_eq!(" STOCK ".parse::<SourceKind>().unwrap(), SourceKind::Equity);
        assert!("bonds".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_source_kind_serde_uses_ids() {
        let json = serde_json::to_string(&SourceKind::DepositaryReceipt).unwrap();
        assert_eq!(json, "\"cedears\"");
        let kind: SourceKind = serde_json::from_str("\"crypto\"").unwrap();
        assert_eq!(kind, SourceKind::Crypto);
    }
}

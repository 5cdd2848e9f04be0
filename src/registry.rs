//! Picks the price source for a free-form group or category label

use crate::core::error::{Error, Result};
use crate::core::price::SourceKind;
use crate::providers::PriceSource;
use serde::Serialize;
use tracing::debug;

/// Substring markers tried in order against the normalized label. First match wins.
const CATEGORY_MARKERS: [(&str, SourceKind); 4] = [
    ("CEDEAR", SourceKind::DepositaryReceipt),
    ("ACCION", SourceKind::Equity),
    ("CRYPTO", SourceKind::Crypto),
    ("CRIPTO", SourceKind::Crypto),
];

/// Outcome of a diagnostic label check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelCheck {
    pub ok: bool,
    pub resolved_category: String,
    pub message: String,
}

pub struct SourceRegistry {
    sources: Vec<PriceSource>,
}

impl SourceRegistry {
    pub fn new(sources: Vec<PriceSource>) -> Self {
        Self { sources }
    }

    fn normalize(label: &str) -> String {
        label.trim().to_uppercase()
    }

    /// Maps a label to a source kind without touching any source.
    pub fn classify(label: &str) -> Result<SourceKind> {
        let normalized = Self::normalize(label);
        if let Some((_, kind)) = CATEGORY_MARKERS
            .iter()
            .find(|(marker, _)| normalized.contains(marker))
        {
            return Ok(*kind);
        }
        SourceKind::ALL
            .into_iter()
            .find(|kind| kind.id().to_uppercase() == normalized)
            .ok_or_else(|| Error::UnsupportedCategory(label.trim().to_string()))
    }

    pub fn resolve(&self, label: &str) -> Result<&PriceSource> {
        let kind = Self::classify(label)?;
        let source = self
            .sources
            .iter()
            .find(|s| s.kind() == kind)
            .ok_or_else(|| Error::UnsupportedCategory(label.trim().to_string()))?;
        debug!("Resolved label '{}' to source {}", label, kind);
        Ok(source)
    }

    /// Resolves the first label that any source supports.
    ///
    /// Fails with the error of the last label when none resolves.
    pub fn resolve_any<'a>(&self, labels: impl IntoIterator<Item = &'a str>) -> Result<&PriceSource> {
        let mut last = Error::UnsupportedCategory(String::new());
        for label in labels {
            match self.resolve(label) {
                Ok(source) => return Ok(source),
                Err(e) => last = e,
            }
        }
        Err(last)
    }

    /// Identifiers of the registered sources, in registration order.
    pub fn list_available(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.kind().id()).collect()
    }

    pub fn validate(&self, label: &str) -> LabelCheck {
        match self.resolve(label) {
            Ok(source) => LabelCheck {
                ok: true,
                resolved_category: source.kind().id().to_string(),
                message: format!(
                    "'{}' is priced by the {} source",
                    label.trim(),
                    source.kind().display_name()
                ),
            },
            Err(e) => LabelCheck {
                ok: false,
                resolved_category: String::new(),
                message: format!("{e}. Available: {}", self.list_available().join(", ")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::SystemClock;
    use crate::core::config::ProvidersConfig;
    use crate::store::KeyValueStore;
    use std::sync::Arc;

    fn registry() -> SourceRegistry {
        let store = KeyValueStore::in_memory(Arc::new(SystemClock));
        SourceRegistry::new(PriceSource::all(&ProvidersConfig::default(), &store).unwrap())
    }

    fn resolved(registry: &SourceRegistry, label: &str) -> Result<SourceKind> {
        registry.resolve(label).map(PriceSource::kind)
    }

    #[test]
    fn test_resolve_by_marker() {
        let registry = registry();
        assert_eq!(
            resolved(&registry, "MIS CEDEARS").unwrap(),
            SourceKind::DepositaryReceipt
        );
        assert_eq!(resolved(&registry, "CRYPTO PORTFOLIO").unwrap(), SourceKind::Crypto);
        assert_eq!(resolved(&registry, "MIS CRIPTOS").unwrap(), SourceKind::Crypto);
        assert_eq!(resolved(&registry, "  acciones usa ").unwrap(), SourceKind::Equity);
    }

    #[test]
    fn test_first_marker_wins() {
        let registry = registry();
        assert_eq!(
            resolved(&registry, "ACCIONES Y CEDEARS").unwrap(),
            SourceKind::DepositaryReceipt
        );
    }

    #[test]
    fn test_resolve_by_identifier() {
        let registry = registry();
        assert_eq!(resolved(&registry, "stock").unwrap(), SourceKind::Equity);
        assert_eq!(resolved(&registry, "Cedears").unwrap(), SourceKind::DepositaryReceipt);
    }

    #[test]
    fn test_unsupported_label() {
        let registry = registry();
        assert_eq!(
            resolved(&registry, "BONOS ARGENTINA").unwrap_err(),
            Error::UnsupportedCategory("BONOS ARGENTINA".into())
        );
        // Identifier match is exact, not substring
        assert!(resolved(&registry, "STOCKS").is_err());
    }

    #[test]
    fn test_resolve_any_falls_back_to_next_label() {
        let registry = registry();
        let source = registry
            .resolve_any(["Largo plazo", "Criptomonedas"])
            .unwrap();
        assert_eq!(source.kind(), SourceKind::Crypto);
        assert!(registry.resolve_any(["BONOS", "FCI"]).is_err());
    }

    #[test]
    fn test_registry_without_source_for_kind() {
        let store = KeyValueStore::in_memory(Arc::new(SystemClock));
        let only_crypto = SourceRegistry::new(vec![
            PriceSource::build(SourceKind::Crypto, &ProvidersConfig::default(), &store).unwrap(),
        ]);
        assert!(only_crypto.resolve("MIS CEDEARS").is_err());
        assert_eq!(only_crypto.list_available(), vec!["crypto"]);
    }

    #[test]
    fn test_list_and_validate() {
        let registry = registry();
        assert_eq!(registry.list_available(), vec!["cedears", "stock", "crypto"]);

        let check = registry.validate("MIS CEDEARS");
        assert!(check.ok);
        assert_eq!(check.resolved_category, "cedears");

        let check = registry.validate("BONOS ARGENTINA");
        assert!(!check.ok);
        assert!(check.resolved_category.is_empty());
        assert!(check.message.contains("cedears, stock, crypto"));
    }
}

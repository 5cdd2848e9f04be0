//! Revalues every holding and records its snapshot and earnings

use crate::core::clock::Clock;
use crate::core::earnings::Earnings;
use crate::core::error::Result;
use crate::core::model::{Holding, HoldingView, Snapshot};
use crate::core::repository::PortfolioRepository;
use crate::registry::SourceRegistry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingFailure {
    pub holding_id: String,
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub failures: Vec<HoldingFailure>,
}

/// Result of revaluing one holding.
#[derive(Debug, Clone)]
pub struct Valuation {
    pub snapshot: Snapshot,
    pub holding: Holding,
}

pub struct ValuationOrchestrator {
    registry: Arc<SourceRegistry>,
    repository: Arc<dyn PortfolioRepository>,
    clock: Arc<dyn Clock>,
    request_delay: Duration,
}

impl ValuationOrchestrator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        repository: Arc<dyn PortfolioRepository>,
        clock: Arc<dyn Clock>,
        request_delay: Duration,
    ) -> Self {
        Self {
            registry,
            repository,
            clock,
            request_delay,
        }
    }

    /// Revalues all holdings one after another.
    ///
    /// Per-holding failures are counted and logged, never returned. Only a failure to load the
    /// holdings fails the cycle. Dropping the future cancels the cycle between holdings; holdings
    /// already processed keep their new snapshot and earnings.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let started_at = self.clock.now();
        let holdings = self.repository.load_holdings().await?;
        info!("Starting valuation cycle for {} holdings", holdings.len());

        let mut succeeded = 0;
        let mut failures = Vec::new();
        for (index, view) in holdings.iter().enumerate() {
            if index > 0 && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }
            match self.value_holding(view).await {
                Ok(_) => succeeded += 1,
                Err(e) => {
                    warn!(
                        holding = %view.holding.id,
                        code = %view.holding.code,
                        error = %e,
                        "Failed to value holding"
                    );
                    failures.push(HoldingFailure {
                        holding_id: view.holding.id.clone(),
                        code: view.holding.code.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let report = CycleReport {
            processed: holdings.len(),
            succeeded,
            failed: failures.len(),
            started_at,
            finished_at: self.clock.now(),
            failures,
        };
        info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            "Valuation cycle finished"
        );
        Ok(report)
    }

    /// Fetches the price, appends a snapshot and updates earnings against the preceding snapshot.
    #[instrument(
        name = "ValueHolding",
        skip(self, view),
        fields(holding = %view.holding.id, code = %view.holding.code)
    )]
    pub async fn value_holding(&self, view: &HoldingView) -> Result<Valuation> {
        let holding = &view.holding;
        let source = self.registry.resolve_any(view.source_labels())?;
        let price = source.fetch_price(&view.category, &holding.code).await?;

        if let Err(e) = self
            .repository
            .record_last_price(&view.category.id, &holding.code, price)
            .await
        {
            warn!(error = %e, "Failed to record last known price");
        }

        let snapshot = self
            .repository
            .create_snapshot(&holding.id, price, holding.quantity)
            .await?;
        let previous = self
            .repository
            .previous_snapshot(&holding.id, &snapshot)
            .await?;

        let mut holding = holding.clone();
        if let Some(earnings) =
            Earnings::between(previous.map(|s| s.price), price, holding.quantity)
        {
            holding.earnings = Some(earnings.absolute);
            holding.relative_earnings = Some(earnings.relative);
        }
        self.repository.save_holding(&holding).await?;

        info!(price, earnings = ?holding.earnings, "Valued holding");
        Ok(Valuation { snapshot, holding })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::config::ProvidersConfig;
    use crate::core::model::{Category, Group};
    use crate::providers::PriceSource;
    use crate::store::{FjallRepository, KeyValueStore, open_keyspace};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        repository: Arc<FjallRepository>,
        orchestrator: ValuationOrchestrator,
    }

    async fn fixture(server: &MockServer, group_name: &str) -> Fixture {
        fixture_with_delay(server, group_name, Duration::ZERO).await
    }

    async fn fixture_with_delay(
        server: &MockServer,
        group_name: &str,
        request_delay: Duration,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let keyspace = open_keyspace(dir.path()).unwrap();
        let repository = Arc::new(FjallRepository::new(&keyspace, clock.clone()).unwrap());
        let store = KeyValueStore::in_memory(clock.clone());
        let registry = Arc::new(SourceRegistry::new(
            PriceSource::all(&ProvidersConfig::default(), &store).unwrap(),
        ));

        repository
            .upsert_category(&Category {
                id: "cat-crypto".into(),
                name: "Largo plazo".into(),
                source_endpoint: format!("{}/crypto", server.uri()),
                currency: "ARS".into(),
            })
            .await
            .unwrap();
        repository
            .upsert_group(&Group {
                id: "g1".into(),
                name: group_name.into(),
                category_id: "cat-crypto".into(),
            })
            .await
            .unwrap();

        Fixture {
            _dir: dir,
            orchestrator: ValuationOrchestrator::new(
                registry,
                repository.clone(),
                clock.clone(),
                request_delay,
            ),
            clock,
            repository,
        }
    }

    async fn mount_price(server: &MockServer, symbol: &str, price: f64) {
        Mock::given(method("GET"))
            .and(path("/crypto"))
            .and(query_param("symbol", symbol))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"{{"symbol":"{symbol}","price":{price},"valid":true}}"#
            )))
            .up_to_n_times(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_batch_isolation() {
        let server = MockServer::start().await;
        mount_price(&server, "BTC", 65000.0).await;
        mount_price(&server, "ETH", 3500.0).await;
        Mock::given(method("GET"))
            .and(query_param("symbol", "BAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let f = fixture(&server, "MIS CRIPTOS").await;
        for (id, code) in [("h1", "BTC"), ("h2", "BAD"), ("h3", "ETH")] {
            f.repository
                .save_holding(&Holding::new(id, code, code, "g1", 1.0))
                .await
                .unwrap();
        }

        let report = f.orchestrator.run_cycle().await.unwrap();
        assert_eq!(
            (report.processed, report.succeeded, report.failed),
            (3, 2, 1)
        );
        assert_eq!(report.failures[0].holding_id, "h2");

        assert_eq!(f.repository.snapshots("h1").await.unwrap().len(), 1);
        assert!(f.repository.snapshots("h2").await.unwrap().is_empty());
        assert_eq!(f.repository.snapshots("h3").await.unwrap()[0].price, 3500.0);
    }

    #[tokio::test]
    async fn test_earnings_follow_consecutive_snapshots() {
        let server = MockServer::start().await;
        mount_price(&server, "BTC", 100.0).await;
        mount_price(&server, "BTC", 110.0).await;

        let f = fixture(&server, "MIS CRIPTOS").await;
        f.repository
            .save_holding(&Holding::new("h1", "Bitcoin", "BTC", "g1", 5.0))
            .await
            .unwrap();

        f.orchestrator.run_cycle().await.unwrap();
        let holding = f.repository.find_holding("h1").await.unwrap().unwrap();
        assert!(holding.earnings.is_none());
        assert!(holding.relative_earnings.is_none());

        // A week later the price cache has long expired
        f.clock.advance(chrono::Duration::days(7));
        let report = f.orchestrator.run_cycle().await.unwrap();
        assert_eq!(report.succeeded, 1);

        let holding = f.repository.find_holding("h1").await.unwrap().unwrap();
        assert!((holding.earnings.unwrap() - 50.0).abs() < 1e-9);
        assert!((holding.relative_earnings.unwrap() - 10.0).abs() < 1e-9);

        let history = f.repository.snapshots("h1").await.unwrap();
        assert_eq!(
            history.iter().map(|s| s.price).collect::<Vec<_>>(),
            vec![100.0, 110.0]
        );
        let instrument = f
            .repository
            .find_instrument("cat-crypto", "BTC")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instrument.last_price, Some(110.0));
    }

    #[tokio::test]
    async fn test_cancelled_cycle_keeps_finished_holdings() {
        let server = MockServer::start().await;
        mount_price(&server, "BTC", 110.0).await;
        mount_price(&server, "ETH", 3850.0).await;

        let f = fixture_with_delay(&server, "MIS CRIPTOS", Duration::from_secs(2)).await;
        for (id, code, price) in [("h1", "BTC", 100.0), ("h2", "ETH", 3500.0)] {
            f.repository
                .save_holding(&Holding::new(id, code, code, "g1", 5.0))
                .await
                .unwrap();
            f.repository.create_snapshot(id, price, 5.0).await.unwrap();
        }
        f.clock.advance(chrono::Duration::days(7));

        // Dropped while waiting out the delay before the second holding
        let cancelled =
            tokio::time::timeout(Duration::from_millis(1000), f.orchestrator.run_cycle()).await;
        assert!(cancelled.is_err());

        let first = f.repository.find_holding("h1").await.unwrap().unwrap();
        assert!((first.earnings.unwrap() - 50.0).abs() < 1e-9);
        assert_eq!(f.repository.snapshots("h1").await.unwrap().len(), 2);

        let second = f.repository.find_holding("h2").await.unwrap().unwrap();
        assert!(second.earnings.is_none());
        assert_eq!(f.repository.snapshots("h2").await.unwrap().len(), 1);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unpriceable_group_fails_without_fetch() {
        let server = MockServer::start().await;
        // Neither the group nor the category name names an asset class
        let f = fixture(&server, "BONOS ARGENTINA").await;
        f.repository
            .save_holding(&Holding::new("h1", "AL30", "AL30", "g1", 100.0))
            .await
            .unwrap();

        let report = f.orchestrator.run_cycle().await.unwrap();
        assert_eq!((report.processed, report.failed), (1, 1));
        assert!(report.failures[0].reason.contains("Largo plazo"));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_portfolio() {
        let server = MockServer::start().await;
        let f = fixture(&server, "MIS CRIPTOS").await;

        let report = f.orchestrator.run_cycle().await.unwrap();
        assert_eq!((report.processed, report.succeeded, report.failed), (0, 0, 0));
        assert!(report.finished_at >= report.started_at);
    }
}

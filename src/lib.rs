pub mod cli;
pub mod core;
pub mod providers;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod validation;
pub mod valuation;

use crate::core::clock::{Clock, SystemClock};
use crate::core::config::AppConfig;
use crate::core::repository::PortfolioRepository;
use crate::providers::PriceSource;
use crate::registry::SourceRegistry;
use crate::scheduler::Scheduler;
use crate::server::AppState;
use crate::store::{FjallRepository, KeyValueStore, open_keyspace};
use crate::validation::ValidationCache;
use crate::valuation::ValuationOrchestrator;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Partition holding validation entries.
const VALIDATION_COLLECTION: &str = "validation";

pub struct ValidateArgs {
    pub name: String,
    pub code: String,
    pub group_id: Option<String>,
    pub category_id: Option<String>,
    pub group_name: Option<String>,
    pub quantity: Option<f64>,
}

pub enum AppCommand {
    Serve,
    Run,
    Validate(ValidateArgs),
    Sources { labels: Vec<String> },
    Holdings,
    History { holding_id: String },
}

/// Every long-lived component, wired against one data directory.
pub struct AppContext {
    pub config: AppConfig,
    pub clock: Arc<dyn Clock>,
    pub repository: Arc<FjallRepository>,
    pub registry: Arc<SourceRegistry>,
    pub validation: Arc<ValidationCache>,
    pub orchestrator: Arc<ValuationOrchestrator>,
    pub scheduler: Scheduler,
}

impl AppContext {
    pub fn open(config: AppConfig) -> Result<Self> {
        let data_path = config.default_data_path()?;
        Self::build(config, &data_path, Arc::new(SystemClock))
    }

    pub fn build(config: AppConfig, data_path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        debug!("Opening data store at {}", data_path.display());
        let keyspace = open_keyspace(data_path)?;
        let repository = Arc::new(FjallRepository::new(&keyspace, clock.clone())?);
        let store = KeyValueStore::persistent(keyspace, clock.clone());

        let registry = Arc::new(SourceRegistry::new(PriceSource::all(
            &config.providers,
            &store,
        )?));
        let validation = Arc::new(ValidationCache::new(
            store.collection(VALIDATION_COLLECTION),
            registry.clone(),
            repository.clone(),
            clock.clone(),
        ));
        let orchestrator = Arc::new(ValuationOrchestrator::new(
            registry.clone(),
            repository.clone(),
            clock.clone(),
            Duration::from_millis(config.valuation.request_delay_ms),
        ));
        let scheduler = Scheduler::new(
            orchestrator.clone(),
            clock.clone(),
            config.schedule.offset()?,
        );

        Ok(Self {
            config,
            clock,
            repository,
            registry,
            validation,
            orchestrator,
            scheduler,
        })
    }

    /// Writes the configured categories, groups and holdings. Earnings of holdings that already
    /// exist are kept.
    pub async fn seed(&self) -> Result<()> {
        for category in &self.config.categories {
            self.repository.upsert_category(category).await?;
        }
        let mut holdings = 0;
        for seed in &self.config.groups {
            self.repository.upsert_group(&seed.group()).await?;
            for mut holding in seed.holdings() {
                if let Some(existing) = self.repository.find_holding(&holding.id).await? {
                    holding.earnings = existing.earnings;
                    holding.relative_earnings = existing.relative_earnings;
                }
                self.repository.save_holding(&holding).await?;
                holdings += 1;
            }
        }
        debug!(
            categories = self.config.categories.len(),
            groups = self.config.groups.len(),
            holdings,
            "Seeded portfolio from config"
        );
        Ok(())
    }

    pub fn app_state(&self, api_key: &str) -> Arc<AppState> {
        Arc::new(AppState {
            registry: self.registry.clone(),
            validation: self.validation.clone(),
            scheduler: self.scheduler.clone(),
            clock: self.clock.clone(),
            api_key: api_key.to_string(),
        })
    }
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let context = AppContext::open(config)?;
    context.seed().await?;

    match command {
        AppCommand::Serve => serve(&context).await,
        AppCommand::Run => cli::run::run_cycle(&context.orchestrator).await,
        AppCommand::Validate(args) => cli::validate::validate(&context.validation, &args).await,
        AppCommand::Sources { labels } => {
            cli::sources::display_sources(&context.registry, &labels);
            Ok(())
        }
        AppCommand::Holdings => cli::holdings::display_holdings(context.repository.as_ref()).await,
        AppCommand::History { holding_id } => {
            cli::history::display_history(context.repository.as_ref(), &holding_id).await
        }
    }
}

async fn serve(context: &AppContext) -> Result<()> {
    let api_key = context.config.require_api_key()?;
    context
        .scheduler
        .start(&context.config.schedule.cron)
        .with_context(|| format!("Invalid cron expression '{}'", context.config.schedule.cron))?;
    info!(
        sources = ?context.registry.list_available(),
        "Price sources registered"
    );
    server::serve(
        context.app_state(api_key),
        &context.config.server.listen_addr,
    )
    .await
}

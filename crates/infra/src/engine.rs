//! Engine wiring: one place that builds the stores and services and hands out shared handles.

use std::sync::Arc;

use tracing::{info, warn};

use boxprice_forecast::{ForecastConsumer, ForecastSource, ModelRegistry, TenantScope};

use crate::alerting::AlertingService;
use crate::batch::BatchRunner;
use crate::collector::{CompetitorGateway, HttpCompetitorGateway, MarketDataCollector};
use crate::config::EngineConfig;
use crate::events::EventPublisher;
use crate::executor::PriceAdjustmentExecutor;
use crate::experiments::ExperimentService;
use crate::quotes::PriceQuoteService;
use crate::store::{
    AlertStore, ExperimentStore, ExposureStore, InMemoryForecastStore, InMemoryModelRegistry, InMemoryPriceLedger,
    MetricStore, ObservationStore, PriceLedger, StrategyStore,
};

/// Forecast reads as the engine performs them: any tenant, object-safe backends.
pub type ForecastReader = ForecastConsumer<Arc<dyn ForecastSource>, Arc<dyn ModelRegistry>>;

pub struct PricingEngine {
    config: EngineConfig,
    publisher: EventPublisher,

    ledger: Arc<dyn PriceLedger>,
    strategies: Arc<StrategyStore>,
    observations: Arc<ObservationStore>,
    forecasts: Arc<InMemoryForecastStore>,
    models: Arc<InMemoryModelRegistry>,
    reader: Arc<ForecastReader>,

    collector: Arc<MarketDataCollector>,
    alerting: Arc<AlertingService>,
    executor: Arc<PriceAdjustmentExecutor>,
    experiments: Arc<ExperimentService>,
    quotes: Arc<PriceQuoteService>,
    batch: BatchRunner,
}

impl PricingEngine {
    /// Engine with every store in memory.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::with_ledger(config, Arc::new(InMemoryPriceLedger::new()))
    }

    /// Engine over a given price ledger (e.g. Postgres); reference stores stay in memory.
    pub fn with_ledger(config: EngineConfig, ledger: Arc<dyn PriceLedger>) -> Self {
        let publisher = EventPublisher::default();
        let strategies = Arc::new(StrategyStore::new());
        let observations = Arc::new(ObservationStore::new());
        let forecasts = Arc::new(InMemoryForecastStore::new());
        let models = Arc::new(InMemoryModelRegistry::new());

        let source: Arc<dyn ForecastSource> = forecasts.clone();
        let registry: Arc<dyn ModelRegistry> = models.clone();
        let reader: Arc<ForecastReader> = Arc::new(ForecastConsumer::new(TenantScope::Any, source, registry));

        let mut collector = MarketDataCollector::new(ledger.clone(), observations.clone(), &config);
        if let Some(url) = config.competitor_gateway_url.as_deref() {
            match HttpCompetitorGateway::new(url, config.gateway_timeout()) {
                Ok(gateway) => {
                    info!(url, "competitor gateway enabled");
                    let gateway: Arc<dyn CompetitorGateway> = Arc::new(gateway);
                    collector = collector.with_gateway(gateway);
                }
                Err(e) => warn!(url, error = %e, "competitor gateway unavailable, using stored observations only"),
            }
        }
        let collector = Arc::new(collector);

        let alerting = Arc::new(AlertingService::new(
            Arc::new(AlertStore::new()),
            Arc::new(MetricStore::new()),
            ledger.clone(),
            strategies.clone(),
            observations.clone(),
            reader.clone(),
            publisher.clone(),
            config.alert_rules(),
            config.cycle(),
        ));
        let executor = Arc::new(PriceAdjustmentExecutor::new(
            ledger.clone(),
            strategies.clone(),
            alerting.clone(),
            publisher.clone(),
            config.cycle(),
        ));
        let experiments = Arc::new(ExperimentService::new(
            Arc::new(ExperimentStore::new()),
            Arc::new(ExposureStore::new()),
            publisher.clone(),
        ));
        let quotes = Arc::new(PriceQuoteService::new(
            ledger.clone(),
            strategies.clone(),
            experiments.clone(),
        ));
        let batch = BatchRunner::new(
            ledger.clone(),
            strategies.clone(),
            collector.clone(),
            reader.clone(),
            executor.clone(),
            publisher.clone(),
            &config,
        );

        Self {
            config,
            publisher,
            ledger,
            strategies,
            observations,
            forecasts,
            models,
            reader,
            collector,
            alerting,
            executor,
            experiments,
            quotes,
            batch,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn ledger(&self) -> &Arc<dyn PriceLedger> {
        &self.ledger
    }

    pub fn strategies(&self) -> &Arc<StrategyStore> {
        &self.strategies
    }

    pub fn observations(&self) -> &Arc<ObservationStore> {
        &self.observations
    }

    /// Forecasts delivered by the training pipeline.
    pub fn forecasts(&self) -> &Arc<InMemoryForecastStore> {
        &self.forecasts
    }

    pub fn models(&self) -> &Arc<InMemoryModelRegistry> {
        &self.models
    }

    /// Forecast lookups as the evaluator sees them.
    pub fn forecast_reader(&self) -> &Arc<ForecastReader> {
        &self.reader
    }

    pub fn collector(&self) -> &Arc<MarketDataCollector> {
        &self.collector
    }

    pub fn alerting(&self) -> &Arc<AlertingService> {
        &self.alerting
    }

    pub fn executor(&self) -> &Arc<PriceAdjustmentExecutor> {
        &self.executor
    }

    pub fn experiments(&self) -> &Arc<ExperimentService> {
        &self.experiments
    }

    pub fn quotes(&self) -> &Arc<PriceQuoteService> {
        &self.quotes
    }

    pub fn batch(&self) -> &BatchRunner {
        &self.batch
    }
}

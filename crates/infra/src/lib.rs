//! Infrastructure layer: stores, competitor gateway, executor, batch runner, scheduler.
//!
//! The pure crates decide; this crate loads their inputs, persists their outputs and
//! publishes the resulting facts on the event bus.

pub mod alerting;
pub mod batch;
pub mod collector;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod experiments;
pub mod quotes;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use alerting::AlertingService;
pub use batch::{BatchRunner, CancellationFlag, CycleReport, SiteOutcome, UnitOutcome};
pub use collector::{CompetitorGateway, GatewayError, HttpCompetitorGateway, MarketDataCollector};
pub use config::{ConfigError, EngineConfig};
pub use engine::{ForecastReader, PricingEngine};
pub use error::{EngineError, EngineResult, StoreError};
pub use events::{EngineBus, EngineEvent, EventPublisher};
pub use executor::{ApplyOutcome, PriceAdjustmentExecutor};
pub use experiments::{AssignedVariant, ExperimentService};
pub use quotes::{PriceQuote, PriceQuoteService, QuoteSource};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use scheduler::{PricingCycleScheduler, PricingCycleSchedulerHandle, SchedulerStats};

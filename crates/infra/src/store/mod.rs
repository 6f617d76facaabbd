//! Persistence for the engine.
//!
//! - [`PriceLedger`]: the transactional money path (units, recommendations, adjustments,
//!   price history). Every price write goes through one atomic `commit`.
//! - Tenant-keyed stores for reference data: strategies, alerts, market data, experiments.

pub mod alerts;
pub mod experiments;
pub mod ledger;
pub mod market;
pub mod strategies;
pub mod tenant_store;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use alerts::AlertStore;
pub use experiments::{ExperimentStore, ExposureStore};
pub use ledger::{AdjustmentQuery, InMemoryPriceLedger, PriceLedger};
pub use market::{
    InMemoryForecastStore, InMemoryModelRegistry, MetricStore, ObservationStore,
};
pub use strategies::StrategyStore;
pub use tenant_store::{InMemoryTenantStore, TenantLog, TenantStore};

#[cfg(feature = "postgres")]
pub use postgres::PostgresPriceLedger;

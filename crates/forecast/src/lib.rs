//! `boxprice-forecast`
//!
//! **Responsibility:** read-only boundary to the external ML training pipeline.
//!
//! - It never trains models and never synthesizes forecasts.
//! - It exposes the latest active model output as plain inputs for the evaluator.
//! - The "current active model" is an injected [`ModelRegistry`], not a global lookup.

pub mod consumer;
pub mod forecast;
pub mod model;

pub use consumer::{ForecastConsumer, ForecastError, ForecastSource, TenantScope};
pub use forecast::{DemandForecast, Forecast};
pub use model::{ModelKind, ModelRegistry, PricingModelLog};

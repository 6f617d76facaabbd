//! `boxprice-pricing`: pure pricing domain.
//!
//! Strategies, unit records, market snapshots, the strategy evaluator, recommendations,
//! applied adjustments, revenue metrics and alert rules. No IO: persistence, network and
//! scheduling live in `boxprice-infra`.

pub mod adjustment;
pub mod alert;
pub mod error;
pub mod evaluator;
pub mod event;
pub mod market;
pub mod recommendation;
pub mod reporting;
pub mod strategy;
pub mod unit;

pub use adjustment::{
    AdjustmentPlan, AdjustmentTrigger, ApplyMode, Approval, PriceAdjustment, PriceHistoryEntry,
};
pub use alert::{AlertKey, AlertKind, AlertRules, AlertSeverity, AlertStatus, NewAlert, PricingAlert};
pub use error::{PricingError, PricingResult};
pub use evaluator::StrategyEvaluator;
pub use event::PricingEvent;
pub use market::{
    CompetitorPriceObservation, CompetitorSignal, MarketSnapshot, ObservationSource, OccupancyCounts,
};
pub use recommendation::{AppliedFactor, PriceRecommendation, RecommendationStatus, StepDirection};
pub use reporting::{PricingHealth, RevenueMetricInput, RevenueMetricSnapshot};
pub use strategy::{
    PriceBounds, PricingStrategy, StrategyConfig, StrategyDefaults, StrategyKind, StrategyRevision,
};
pub use unit::{UnitRecord, UnitStatus};

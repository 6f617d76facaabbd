//! `boxprice-core`: shared building blocks for the pricing engine.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! typed identifiers, money, the domain error model and aggregate traits.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{
    AdjustmentId, AggregateId, AlertId, ExperimentId, ModelId, RecommendationId, SiteId,
    StrategyId, TenantId, UnitId, UserId,
};
pub use money::Money;
pub use value_object::ValueObject;

use thiserror::Error;

use boxprice_core::{DomainError, Money, UnitId};

use crate::recommendation::RecommendationStatus;

pub type PricingResult<T> = Result<T, PricingError>;

/// Failure taxonomy of the pricing pipeline.
///
/// Missing competitor data or forecasts are not errors; they are absent signals.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PricingError {
    /// Missing/invalid base price or malformed strategy. Fatal for one unit's cycle only.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("price {price} outside bounds [{floor}, {ceiling}]")]
    BoundsViolation {
        price: Money,
        floor: Money,
        ceiling: Money,
    },

    /// The unit changed since the recommendation was computed.
    #[error("unit modified concurrently (expected version {expected}, found {actual})")]
    ConcurrentModification { expected: u64, actual: u64 },

    #[error("recommendation is {0:?}, not pending")]
    RecommendationNotPending(RecommendationStatus),

    #[error("recommendation expired")]
    RecommendationExpired,

    #[error("manual adjustment requires an approving user")]
    ApprovalRequired,

    #[error("unit {0} already auto-adjusted in this cycle")]
    RateLimited(UnitId),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl PricingError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Stable machine-readable code (API payloads, alert details, logs).
    pub fn code(&self) -> &'static str {
        match self {
            PricingError::Configuration(_) => "configuration_error",
            PricingError::BoundsViolation { .. } => "bounds_violation",
            PricingError::ConcurrentModification { .. } => "concurrent_modification",
            PricingError::RecommendationNotPending(_) => "recommendation_not_pending",
            PricingError::RecommendationExpired => "recommendation_expired",
            PricingError::ApprovalRequired => "approval_required",
            PricingError::RateLimited(_) => "rate_limited",
            PricingError::Domain(_) => "domain_error",
        }
    }
}

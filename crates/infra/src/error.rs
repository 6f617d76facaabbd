use thiserror::Error;

use boxprice_core::DomainError;
use boxprice_experiments::ExperimentError;
use boxprice_forecast::ForecastError;
use boxprice_pricing::PricingError;

/// Storage operation error.
///
/// Infrastructure failures (missing rows, isolation, concurrency, backend errors) as opposed
/// to domain errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Cross-tenant access attempted.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// Compare-and-set on a unit version failed.
    #[error("version conflict (expected {expected}, found {actual})")]
    VersionConflict { expected: u64, actual: u64 },

    /// A record is no longer in the state the write assumed.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Error surfaced by the engine services.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error(transparent)]
    Experiment(#[from] ExperimentError),

    #[error(transparent)]
    Forecast(#[from] ForecastError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl EngineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::Store(StoreError::NotFound(what.into()))
    }

    /// Stable machine-readable code (API payloads, logs).
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Pricing(PricingError::Domain(e)) | EngineError::Domain(e) => domain_code(e),
            EngineError::Pricing(e) => e.code(),
            EngineError::Experiment(e) => match e {
                ExperimentError::Configuration(_) => "experiment_configuration_error",
                ExperimentError::InvalidTransition { .. } => "invalid_transition",
                ExperimentError::NotRunning(_) => "experiment_not_running",
                ExperimentError::Frozen => "experiment_frozen",
                ExperimentError::UnknownVariant(_) => "unknown_variant",
                ExperimentError::Domain(e) => domain_code(e),
            },
            EngineError::Forecast(ForecastError::TenantScope) => "tenant_isolation",
            EngineError::Forecast(ForecastError::Source(_)) => "forecast_unavailable",
            EngineError::Store(e) => match e {
                StoreError::NotFound(_) => "not_found",
                StoreError::TenantIsolation(_) => "tenant_isolation",
                StoreError::VersionConflict { .. } => "concurrent_modification",
                StoreError::Conflict(_) => "conflict",
                StoreError::Storage(_) => "storage_error",
            },
        }
    }
}

fn domain_code(e: &DomainError) -> &'static str {
    match e {
        DomainError::Validation(_) => "validation_error",
        DomainError::InvariantViolation(_) => "invariant_violation",
        DomainError::InvalidId(_) => "invalid_id",
        DomainError::NotFound => "not_found",
        DomainError::Conflict(_) => "conflict",
        DomainError::TenantMismatch => "tenant_isolation",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxprice_core::UnitId;

    #[test]
    fn nested_domain_errors_keep_their_code() {
        let err = EngineError::from(PricingError::Domain(DomainError::TenantMismatch));
        assert_eq!(err.code(), "tenant_isolation");
        assert_eq!(
            EngineError::from(PricingError::RateLimited(UnitId::new())).code(),
            "rate_limited"
        );
        assert_eq!(EngineError::not_found("unit").code(), "not_found");
    }
}

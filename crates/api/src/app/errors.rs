use std::str::FromStr;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use boxprice_core::UserId;
use boxprice_infra::EngineError;

use crate::context::ActorContext;

pub fn engine_error_to_response(err: EngineError) -> axum::response::Response {
    let code = err.code();
    let status = status_for(code);
    if status.is_server_error() {
        error!(code, error = %err, "request failed");
    }
    json_error(status, code, err.to_string())
}

fn status_for(code: &str) -> StatusCode {
    match code {
        "not_found" => StatusCode::NOT_FOUND,
        "conflict"
        | "concurrent_modification"
        | "invalid_transition"
        | "recommendation_not_pending"
        | "recommendation_expired"
        | "experiment_not_running"
        | "experiment_frozen" => StatusCode::CONFLICT,
        "validation_error" | "invalid_id" | "unknown_variant" => StatusCode::BAD_REQUEST,
        "configuration_error"
        | "experiment_configuration_error"
        | "bounds_violation"
        | "invariant_violation"
        | "approval_required"
        | "rate_limited" => StatusCode::UNPROCESSABLE_ENTITY,
        "tenant_isolation" => StatusCode::FORBIDDEN,
        "forecast_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, axum::response::Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}

/// The acting user, for operations that record who did them.
pub fn require_user(actor: &ActorContext) -> Result<UserId, axum::response::Response> {
    actor.user_id().ok_or_else(|| {
        json_error(
            StatusCode::BAD_REQUEST,
            "missing_user",
            "x-user-id header is required for this operation",
        )
    })
}

#[cfg(test)]
mod tests {
    use boxprice_core::UnitId;
    use boxprice_pricing::PricingError;

    use super::*;

    #[test]
    fn engine_codes_map_to_statuses() {
        assert_eq!(status_for(EngineError::not_found("unit").code()), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(EngineError::from(PricingError::RateLimited(UnitId::new())).code()),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(EngineError::from(PricingError::ConcurrentModification { expected: 1, actual: 2 }).code()),
            StatusCode::CONFLICT
        );
        assert_eq!(status_for("storage_error"), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

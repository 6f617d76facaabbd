//! Inputs from outside the engine: competitor observations and the training pipeline's output.

use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::info;

use boxprice_forecast::{DemandForecast, PricingModelLog};
use boxprice_pricing::CompetitorPriceObservation;

use crate::app::routes::reply;
use crate::app::services::AppServices;
use crate::app::dto;
use crate::context::TenantContext;

/// POST /observations
///
/// Manually entered or scraped competitor rate. `collected_at` defaults to now.
pub async fn record_observation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<JsonValue>,
) -> axum::response::Response {
    let observation: CompetitorPriceObservation =
        match dto::with_tenant(body, tenant.tenant_id(), &[("collected_at", dto::now_json(Utc::now()))]) {
            Ok(v) => v,
            Err(r) => return r,
        };
    let echo = observation.clone();
    reply(
        StatusCode::CREATED,
        services.engine().collector().record_observation(observation).map(|()| echo),
    )
}

/// POST /forecasts
pub async fn ingest_forecast(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<JsonValue>,
) -> axum::response::Response {
    let forecast: DemandForecast =
        match dto::with_tenant(body, tenant.tenant_id(), &[("generated_at", dto::now_json(Utc::now()))]) {
            Ok(v) => v,
            Err(r) => return r,
        };
    info!(
        tenant = %tenant.tenant_id(),
        site = %forecast.site_id,
        date = %forecast.forecast_date,
        "forecast ingested"
    );
    services.engine().forecasts().insert(forecast.clone());
    (StatusCode::CREATED, Json(forecast)).into_response()
}

/// POST /models
///
/// Training log of a model version; only active models feed the evaluator.
pub async fn register_model(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<JsonValue>,
) -> axum::response::Response {
    let model: PricingModelLog =
        match dto::with_tenant(body, tenant.tenant_id(), &[("trained_at", dto::now_json(Utc::now()))]) {
            Ok(v) => v,
            Err(r) => return r,
        };
    info!(
        tenant = %tenant.tenant_id(),
        model = %model.id,
        version = %model.model_version,
        active = model.is_active,
        "model registered"
    );
    services.engine().models().register(model.clone());
    (StatusCode::CREATED, Json(model)).into_response()
}

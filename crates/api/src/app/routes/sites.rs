use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use boxprice_core::{DomainError, SiteId};
use boxprice_infra::EngineError;

use crate::app::routes::reply;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/:site/units", get(list_units))
        .route("/:site/market", get(latest_snapshots))
        .route("/:site/market/collect", post(collect))
        .route("/:site/forecast", get(forecast))
        .route("/:site/scan", post(scan))
        .route("/:site/health", get(pricing_health))
        .route("/:site/metrics", get(metrics))
}

pub async fn list_units(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(site): Path<String>,
) -> axum::response::Response {
    let site_id = match errors::parse_id::<SiteId>(&site, "site") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let items = services
        .engine()
        .ledger()
        .units_for_site(tenant.tenant_id(), site_id)
        .await
        .map(|items| serde_json::json!({ "items": items }));
    reply(StatusCode::OK, items)
}

/// POST /sites/:site/market/collect
///
/// Fresh occupancy and competitor snapshot for one category. A failing competitor
/// gateway degrades the snapshot instead of failing the call.
pub async fn collect(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(site): Path<String>,
    Json(body): Json<dto::CollectRequest>,
) -> axum::response::Response {
    let site_id = match errors::parse_id::<SiteId>(&site, "site") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let snapshot = services
        .engine()
        .collector()
        .collect(tenant.tenant_id(), site_id, &body.category, Utc::now())
        .await;
    reply(StatusCode::OK, snapshot)
}

pub async fn latest_snapshots(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(site): Path<String>,
) -> axum::response::Response {
    let site_id = match errors::parse_id::<SiteId>(&site, "site") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let items = services
        .engine()
        .observations()
        .latest_snapshots(tenant.tenant_id(), site_id);
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

/// GET /sites/:site/forecast?category=...&date=YYYY-MM-DD
///
/// `forecast` is null when no usable forecast exists (unknown or inactive model, stale).
pub async fn forecast(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(site): Path<String>,
    Query(query): Query<dto::ForecastQuery>,
) -> axum::response::Response {
    let site_id = match errors::parse_id::<SiteId>(&site, "site") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let forecast = services
        .engine()
        .forecast_reader()
        .get_forecast(tenant.tenant_id(), site_id, &query.category, query.date, Utc::now())
        .map(|forecast| serde_json::json!({ "forecast": forecast }));
    reply(StatusCode::OK, forecast)
}

/// POST /sites/:site/scan
///
/// Run the alert rules for the site now; returns the alerts raised.
pub async fn scan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(site): Path<String>,
) -> axum::response::Response {
    let site_id = match errors::parse_id::<SiteId>(&site, "site") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let raised = services
        .engine()
        .alerting()
        .scan_site(tenant.tenant_id(), site_id, Utc::now())
        .await
        .map(|items| serde_json::json!({ "items": items }));
    reply(StatusCode::OK, raised)
}

pub async fn pricing_health(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(site): Path<String>,
) -> axum::response::Response {
    let site_id = match errors::parse_id::<SiteId>(&site, "site") {
        Ok(v) => v,
        Err(r) => return r,
    };
    reply(
        StatusCode::OK,
        services.engine().alerting().pricing_health(tenant.tenant_id(), site_id).await,
    )
}

pub async fn metrics(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(site): Path<String>,
    Query(range): Query<dto::MetricsRangeQuery>,
) -> axum::response::Response {
    let site_id = match errors::parse_id::<SiteId>(&site, "site") {
        Ok(v) => v,
        Err(r) => return r,
    };
    if range.from > range.to {
        return errors::engine_error_to_response(EngineError::Domain(DomainError::validation(
            "period start is after its end",
        )));
    }
    let items = services
        .engine()
        .alerting()
        .metrics(tenant.tenant_id(), site_id, range.from, range.to);
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

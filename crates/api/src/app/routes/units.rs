use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tracing::info;

use boxprice_core::UnitId;
use boxprice_infra::EngineError;

use crate::app::routes::reply;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ActorContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(get_unit).put(upsert_unit))
        .route("/:id/quote", get(quote))
        .route("/:id/contract", post(lock_for_contract))
        .route("/:id/history", get(price_history))
        .route("/:id/recommendation", get(latest_recommendation))
        .route("/:id/override", post(manual_override))
}

/// PUT /units/:id
///
/// Platform sync. Engine-owned price fields of an existing unit are kept.
pub async fn upsert_unit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpsertUnitRequest>,
) -> axum::response::Response {
    let unit_id = match errors::parse_id::<UnitId>(&id, "unit") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let record = body.into_record(tenant.tenant_id(), unit_id);
    reply(StatusCode::OK, services.engine().ledger().upsert_unit(record).await)
}

pub async fn get_unit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let unit_id = match errors::parse_id::<UnitId>(&id, "unit") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let unit = services
        .engine()
        .ledger()
        .unit(tenant.tenant_id(), unit_id)
        .await
        .map_err(EngineError::from)
        .and_then(|u| u.ok_or_else(|| EngineError::not_found(format!("unit {unit_id}"))));
    reply(StatusCode::OK, unit)
}

/// GET /units/:id/quote?visitor=...
///
/// Price to show on a listing or booking page. With a visitor id, running experiments
/// assign a variant and record the exposure.
pub async fn quote(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Query(query): Query<dto::QuoteQuery>,
) -> axum::response::Response {
    let unit_id = match errors::parse_id::<UnitId>(&id, "unit") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let quote = services
        .engine()
        .quotes()
        .current_or_recommended_price(tenant.tenant_id(), unit_id, query.visitor.as_deref(), Utc::now())
        .await;
    reply(StatusCode::OK, quote)
}

/// POST /units/:id/contract
///
/// Reads the price and reserves the unit in one step; a recommendation computed
/// before this call can no longer be applied.
pub async fn lock_for_contract(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let unit_id = match errors::parse_id::<UnitId>(&id, "unit") {
        Ok(v) => v,
        Err(r) => return r,
    };
    match services
        .engine()
        .ledger()
        .lock_unit_for_contract(tenant.tenant_id(), unit_id)
        .await
    {
        Ok(price) => {
            info!(tenant = %tenant.tenant_id(), unit = %unit_id, price = price.cents(), "unit locked for contract");
            (
                StatusCode::OK,
                Json(serde_json::json!({ "unit_id": unit_id, "price": price })),
            )
                .into_response()
        }
        Err(e) => errors::engine_error_to_response(e.into()),
    }
}

pub async fn price_history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let unit_id = match errors::parse_id::<UnitId>(&id, "unit") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let items = services
        .engine()
        .ledger()
        .price_history(tenant.tenant_id(), unit_id)
        .await
        .map(|items| serde_json::json!({ "items": items }));
    reply(StatusCode::OK, items)
}

pub async fn latest_recommendation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let unit_id = match errors::parse_id::<UnitId>(&id, "unit") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let rec = services
        .engine()
        .ledger()
        .latest_recommendation(tenant.tenant_id(), unit_id)
        .await
        .map_err(EngineError::from)
        .and_then(|r| r.ok_or_else(|| EngineError::not_found(format!("recommendation for unit {unit_id}"))));
    reply(StatusCode::OK, rec)
}

/// POST /units/:id/override
///
/// Staff-set price. Requires the approving user (`x-user-id`); bounds still apply.
pub async fn manual_override(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::OverrideRequest>,
) -> axum::response::Response {
    let unit_id = match errors::parse_id::<UnitId>(&id, "unit") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let outcome = services
        .engine()
        .executor()
        .manual_override(tenant.tenant_id(), unit_id, body.price, actor.user_id(), &body.reason, Utc::now())
        .await;
    reply(StatusCode::OK, outcome)
}

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use boxprice_core::RecommendationId;
use boxprice_infra::store::AdjustmentQuery;
use boxprice_pricing::ApplyMode;

use crate::app::routes::reply;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ActorContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_pending))
        .route("/:id", get(get_recommendation))
        .route("/:id/apply", post(apply))
        .route("/:id/reject", post(reject))
}

/// GET /recommendations?site_id=...
///
/// Review queue: pending recommendations, newest first.
pub async fn list_pending(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(filter): Query<dto::SiteFilter>,
) -> axum::response::Response {
    let items = services
        .engine()
        .quotes()
        .pending_recommendations(tenant.tenant_id(), filter.site_id)
        .await
        .map(|items| serde_json::json!({ "items": items }));
    reply(StatusCode::OK, items)
}

pub async fn get_recommendation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let rec_id = match errors::parse_id::<RecommendationId>(&id, "recommendation") {
        Ok(v) => v,
        Err(r) => return r,
    };
    reply(
        StatusCode::OK,
        services.engine().quotes().recommendation(tenant.tenant_id(), rec_id).await,
    )
}

/// POST /recommendations/:id/apply
///
/// Manual approval by the `x-user-id` user. A unit that changed since evaluation
/// answers 409 and the recommendation is expired.
pub async fn apply(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let rec_id = match errors::parse_id::<RecommendationId>(&id, "recommendation") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let outcome = services
        .engine()
        .executor()
        .apply(tenant.tenant_id(), rec_id, ApplyMode::Manual(actor.user_id()), Utc::now())
        .await;
    reply(StatusCode::OK, outcome)
}

pub async fn reject(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RejectRequest>,
) -> axum::response::Response {
    let rec_id = match errors::parse_id::<RecommendationId>(&id, "recommendation") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let rejected = services
        .engine()
        .executor()
        .reject(tenant.tenant_id(), rec_id, &body.reason, Utc::now())
        .await;
    reply(StatusCode::OK, rejected)
}

/// GET /adjustments?unit_id=...|site_id=...&from=...&to=...&limit=...
///
/// Audit trail of applied price changes, newest first. A unit or site scope is required.
pub async fn list_adjustments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<AdjustmentQuery>,
) -> axum::response::Response {
    let items = services
        .engine()
        .quotes()
        .list_price_adjustments(tenant.tenant_id(), &query)
        .await
        .map(|items| serde_json::json!({ "items": items }));
    reply(StatusCode::OK, items)
}

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use boxprice_core::AlertId;
use boxprice_pricing::RevenueMetricInput;

use crate::app::routes::reply;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ActorContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_open))
        .route("/:id", get(get_alert))
        .route("/:id/read", post(mark_read))
        .route("/:id/acknowledge", post(acknowledge))
        .route("/:id/resolve", post(resolve))
}

/// GET /alerts?site_id=...
///
/// Poll side of the alert feed: every alert not yet resolved, newest first.
pub async fn list_open(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(filter): Query<dto::SiteFilter>,
) -> axum::response::Response {
    let items = services
        .engine()
        .alerting()
        .list_open(tenant.tenant_id(), filter.site_id)
        .map(|items| serde_json::json!({ "items": items }));
    reply(StatusCode::OK, items)
}

pub async fn get_alert(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let alert_id = match errors::parse_id::<AlertId>(&id, "alert") {
        Ok(v) => v,
        Err(r) => return r,
    };
    reply(StatusCode::OK, services.engine().alerting().get(tenant.tenant_id(), alert_id))
}

pub async fn mark_read(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let alert_id = match errors::parse_id::<AlertId>(&id, "alert") {
        Ok(v) => v,
        Err(r) => return r,
    };
    reply(
        StatusCode::OK,
        services
            .engine()
            .alerting()
            .mark_read(tenant.tenant_id(), alert_id, Utc::now()),
    )
}

pub async fn acknowledge(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let alert_id = match errors::parse_id::<AlertId>(&id, "alert") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let user = match errors::require_user(&actor) {
        Ok(v) => v,
        Err(r) => return r,
    };
    reply(
        StatusCode::OK,
        services
            .engine()
            .alerting()
            .acknowledge(tenant.tenant_id(), alert_id, user, Utc::now()),
    )
}

pub async fn resolve(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let alert_id = match errors::parse_id::<AlertId>(&id, "alert") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let user = match errors::require_user(&actor) {
        Ok(v) => v,
        Err(r) => return r,
    };
    reply(
        StatusCode::OK,
        services
            .engine()
            .alerting()
            .resolve(tenant.tenant_id(), alert_id, user, Utc::now()),
    )
}

/// POST /metrics
///
/// Period figures for one site. A second submission for the same (site, date) answers 409.
pub async fn record_metrics(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<RevenueMetricInput>,
) -> axum::response::Response {
    reply(
        StatusCode::CREATED,
        services
            .engine()
            .alerting()
            .record_metrics(tenant.tenant_id(), body, Utc::now()),
    )
}

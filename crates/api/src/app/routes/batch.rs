use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tracing::info;

use boxprice_core::SiteId;
use boxprice_infra::CancellationFlag;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/run", post(run_cycle))
        .route("/trigger", post(trigger))
        .route("/scheduler", get(scheduler_stats))
}

/// POST /batch/run
///
/// One pricing cycle for the caller's tenant, run inline. Failing sites are reported
/// in the result; they never fail the request.
pub async fn run_cycle(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    body: Option<Json<dto::BatchRunRequest>>,
) -> axum::response::Response {
    let tenant_id = tenant.tenant_id();
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let engine = services.engine();

    let sites: Vec<SiteId> = match request.site_ids {
        Some(sites) => sites,
        None => match engine.ledger().site_directory().await {
            Ok(directory) => directory
                .into_iter()
                .filter(|(t, _)| *t == tenant_id)
                .map(|(_, site)| site)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            Err(e) => return errors::engine_error_to_response(e.into()),
        },
    };

    let mut runner = engine.batch().clone();
    if let Some(auto_apply) = request.auto_apply {
        runner = runner.with_auto_apply(auto_apply);
    }
    info!(tenant = %tenant_id, sites = sites.len(), auto_apply = runner.auto_apply(), "batch run requested");

    let report = runner
        .run_cycle(tenant_id, &sites, &CancellationFlag::new(), Utc::now())
        .await;
    (StatusCode::OK, Json(dto::cycle_report_to_json(&report))).into_response()
}

/// POST /batch/trigger
///
/// Ask the background scheduler for a cycle over every tenant. Coalesces with a
/// cycle already queued.
pub async fn trigger(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    if services.trigger_cycle() {
        StatusCode::ACCEPTED.into_response()
    } else {
        errors::json_error(StatusCode::CONFLICT, "scheduler_disabled", "no background scheduler is running")
    }
}

/// GET /batch/scheduler
///
/// Scheduler counters, with the last cycle reports narrowed to the caller's tenant.
pub async fn scheduler_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    match services.scheduler_stats() {
        Some(mut stats) => {
            stats.last_reports.retain(|r| r.tenant_id == tenant.tenant_id());
            (StatusCode::OK, Json(stats)).into_response()
        }
        None => errors::json_error(StatusCode::NOT_FOUND, "scheduler_disabled", "no background scheduler is running"),
    }
}

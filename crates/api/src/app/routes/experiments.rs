use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};

use boxprice_core::{ExperimentId, TenantId};
use boxprice_experiments::{ExperimentDefinition, PricingExperiment};
use boxprice_infra::{EngineResult, ExperimentService};

use crate::app::routes::reply;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_experiment).get(list_experiments))
        .route("/:id", get(get_experiment))
        .route("/:id/start", post(start))
        .route("/:id/pause", post(pause))
        .route("/:id/resume", post(resume))
        .route("/:id/complete", post(complete))
        .route("/:id/cancel", post(cancel))
        .route("/:id/assign", post(assign))
        .route("/:id/conversions", post(record_conversion))
        .route("/:id/exposures", get(list_exposures))
        .route("/:id/evaluation", get(evaluate))
}

type Transition = fn(&ExperimentService, TenantId, ExperimentId, DateTime<Utc>) -> EngineResult<PricingExperiment>;

fn experiment_reply(status: StatusCode, result: EngineResult<PricingExperiment>) -> axum::response::Response {
    match result {
        Ok(experiment) => (status, Json(dto::experiment_to_json(&experiment))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

fn with_experiment(services: &AppServices, tenant: TenantContext, id: &str, f: Transition) -> axum::response::Response {
    let experiment_id = match errors::parse_id::<ExperimentId>(id, "experiment") {
        Ok(v) => v,
        Err(r) => return r,
    };
    experiment_reply(
        StatusCode::OK,
        f(services.engine().experiments(), tenant.tenant_id(), experiment_id, Utc::now()),
    )
}

/// POST /experiments
///
/// Draft from a definition. Invalid variant weights or confidence answer 422.
pub async fn create_experiment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<ExperimentDefinition>,
) -> axum::response::Response {
    let created = services
        .engine()
        .experiments()
        .create(tenant.tenant_id(), body, Utc::now());
    experiment_reply(StatusCode::CREATED, created)
}

pub async fn list_experiments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    match services.engine().experiments().list(tenant.tenant_id()) {
        Ok(items) => {
            let items = items.iter().map(dto::experiment_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_experiment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    with_experiment(&services, tenant, &id, |svc, tenant_id, experiment_id, _| {
        svc.get(tenant_id, experiment_id)
    })
}

pub async fn start(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    with_experiment(&services, tenant, &id, ExperimentService::start)
}

pub async fn pause(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    with_experiment(&services, tenant, &id, ExperimentService::pause)
}

pub async fn resume(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    with_experiment(&services, tenant, &id, ExperimentService::resume)
}

/// POST /experiments/:id/complete
///
/// Evaluates the recorded exposures and freezes the outcome; later conversions are refused.
pub async fn complete(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    with_experiment(&services, tenant, &id, ExperimentService::complete)
}

pub async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    with_experiment(&services, tenant, &id, ExperimentService::cancel)
}

/// POST /experiments/:id/assign
///
/// Variant for a visitor without recording anything; `variant` is null outside the
/// traffic share.
pub async fn assign(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::VisitorRequest>,
) -> axum::response::Response {
    let experiment_id = match errors::parse_id::<ExperimentId>(&id, "experiment") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let assigned = services
        .engine()
        .experiments()
        .assign(tenant.tenant_id(), experiment_id, &body.visitor_id)
        .map(|variant| serde_json::json!({ "visitor_id": body.visitor_id, "variant": variant }));
    reply(StatusCode::OK, assigned)
}

/// POST /experiments/:id/conversions
///
/// The visitor signed a contract; attributes the revenue to their exposure.
pub async fn record_conversion(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ConversionRequest>,
) -> axum::response::Response {
    let experiment_id = match errors::parse_id::<ExperimentId>(&id, "experiment") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let exposure = services.engine().experiments().record_conversion(
        tenant.tenant_id(),
        experiment_id,
        &body.visitor_id,
        body.revenue,
        Utc::now(),
    );
    reply(StatusCode::OK, exposure)
}

pub async fn list_exposures(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let experiment_id = match errors::parse_id::<ExperimentId>(&id, "experiment") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let items = services
        .engine()
        .experiments()
        .exposures(tenant.tenant_id(), experiment_id)
        .map(|items| serde_json::json!({ "items": items }));
    reply(StatusCode::OK, items)
}

/// GET /experiments/:id/evaluation
///
/// Significance test over the current exposures; the frozen result once completed.
pub async fn evaluate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let experiment_id = match errors::parse_id::<ExperimentId>(&id, "experiment") {
        Ok(v) => v,
        Err(r) => return r,
    };
    reply(
        StatusCode::OK,
        services
            .engine()
            .experiments()
            .evaluate(tenant.tenant_id(), experiment_id, Utc::now()),
    )
}

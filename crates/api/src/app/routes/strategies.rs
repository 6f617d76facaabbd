use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use boxprice_core::StrategyId;
use boxprice_infra::EngineError;
use boxprice_pricing::StrategyConfig;

use crate::app::routes::reply;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_strategy).get(list_strategies))
        .route("/:id", get(get_strategy).put(revise_strategy))
        .route("/:id/deactivate", post(deactivate_strategy))
}

#[derive(Debug, Default, Deserialize)]
pub struct VersionQuery {
    pub version: Option<u32>,
}

/// POST /strategies
///
/// Unset parameters take the engine defaults; invalid ones are rejected with 422.
pub async fn create_strategy(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<StrategyConfig>,
) -> axum::response::Response {
    let engine = services.engine();
    let created = engine.strategies().create(
        tenant.tenant_id(),
        &body,
        engine.config().strategy_defaults(),
        Utc::now(),
    );
    reply(StatusCode::CREATED, created)
}

pub async fn list_strategies(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    let items = services
        .engine()
        .strategies()
        .list(tenant.tenant_id())
        .map(|items| serde_json::json!({ "items": items }));
    reply(StatusCode::OK, items)
}

/// GET /strategies/:id?version=N
///
/// Latest version unless one is named; old versions stay readable for audit.
pub async fn get_strategy(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Query(query): Query<VersionQuery>,
) -> axum::response::Response {
    let strategy_id = match errors::parse_id::<StrategyId>(&id, "strategy") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let store = services.engine().strategies();
    let found = match query.version {
        Some(version) => store.get(tenant.tenant_id(), strategy_id, version),
        None => store.latest(tenant.tenant_id(), strategy_id),
    };
    let strategy = found
        .map_err(EngineError::from)
        .and_then(|s| s.ok_or_else(|| EngineError::not_found(format!("strategy {strategy_id}"))));
    reply(StatusCode::OK, strategy)
}

/// PUT /strategies/:id
///
/// Edits in place until an adjustment references the version; then a new version is created.
pub async fn revise_strategy(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<StrategyConfig>,
) -> axum::response::Response {
    let strategy_id = match errors::parse_id::<StrategyId>(&id, "strategy") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let engine = services.engine();
    let revised = engine
        .strategies()
        .revise(
            tenant.tenant_id(),
            strategy_id,
            &body,
            engine.config().strategy_defaults(),
            Utc::now(),
        )
        .map(|revision| dto::revision_to_json(&revision));
    reply(StatusCode::OK, revised)
}

pub async fn deactivate_strategy(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let strategy_id = match errors::parse_id::<StrategyId>(&id, "strategy") {
        Ok(v) => v,
        Err(r) => return r,
    };
    reply(
        StatusCode::OK,
        services.engine().strategies().deactivate(tenant.tenant_id(), strategy_id),
    )
}

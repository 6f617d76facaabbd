use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use boxprice_infra::EngineError;

use crate::app::errors;

pub mod alerts;
pub mod batch;
pub mod experiments;
pub mod market;
pub mod recommendations;
pub mod sites;
pub mod strategies;
pub mod system;
pub mod units;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .route("/adjustments", get(recommendations::list_adjustments))
        .route("/observations", post(market::record_observation))
        .route("/forecasts", post(market::ingest_forecast))
        .route("/models", post(market::register_model))
        .route("/metrics", post(alerts::record_metrics))
        .nest("/units", units::router())
        .nest("/sites", sites::router())
        .nest("/strategies", strategies::router())
        .nest("/recommendations", recommendations::router())
        .nest("/experiments", experiments::router())
        .nest("/alerts", alerts::router())
        .nest("/batch", batch::router())
}

/// Serialize a service result, or map its error.
pub(crate) fn reply<T, E>(status: StatusCode, result: Result<T, E>) -> Response
where
    T: Serialize,
    E: Into<EngineError>,
{
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(e) => errors::engine_error_to_response(e.into()),
    }
}

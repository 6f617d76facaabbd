use std::str::FromStr;

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use thiserror::Error;

use boxprice_core::{TenantId, UserId};

use crate::app::errors;
use crate::context::{ActorContext, TenantContext};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("{0} header is required")]
    Missing(&'static str),

    #[error("{0} header is not a valid id")]
    Invalid(&'static str),
}

/// Resolve the tenant (required) and acting user (optional) from request headers.
///
/// Every pricing route runs behind this layer; handlers read the contexts from extensions.
pub async fn tenant_middleware(mut req: Request, next: Next) -> Result<Response, Response> {
    let tenant_id = header_id::<TenantId>(req.headers(), TENANT_HEADER)
        .and_then(|id| id.ok_or(HeaderError::Missing(TENANT_HEADER)))
        .map_err(|e| match e {
            HeaderError::Missing(_) => errors::json_error(StatusCode::UNAUTHORIZED, "missing_tenant", e.to_string()),
            HeaderError::Invalid(_) => errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()),
        })?;
    let user_id = header_id::<UserId>(req.headers(), USER_HEADER)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))?;

    req.extensions_mut().insert(TenantContext::new(tenant_id));
    req.extensions_mut().insert(ActorContext::new(user_id));

    Ok(next.run(req).await)
}

fn header_id<T: FromStr>(headers: &HeaderMap, name: &'static str) -> Result<Option<T>, HeaderError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| HeaderError::Invalid(name))?.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value.parse().map(Some).map_err(|_| HeaderError::Invalid(name))
}

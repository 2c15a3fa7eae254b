//! Caller identity extractor.
//!
//! The fronting gateway authenticates users and forwards who they are as
//! headers:
//! - `X-Tenant-Id: <uuid>`
//! - `X-Employee-Id: <uuid>`
//! - `X-Role: employee | manager | hr_manager | hr_admin | tenant_admin | system_admin`
//!
//! A request missing any of them, or carrying an unparseable value, is
//! rejected with 401.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use uuid::Uuid;

use hrflow_types::auth::{AuthContext, CallerRole};

use crate::http::error::AppError;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const EMPLOYEE_HEADER: &str = "x-employee-id";
pub const ROLE_HEADER: &str = "x-role";

/// The authorization context of the current request.
pub struct Caller(pub AuthContext);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        auth_from_headers(&parts.headers).map(Caller)
    }
}

pub fn auth_from_headers(headers: &HeaderMap) -> Result<AuthContext, AppError> {
    let tenant_id = header(headers, TENANT_HEADER)?
        .parse::<Uuid>()
        .map_err(|_| AppError::Unauthorized(format!("{TENANT_HEADER} is not a valid UUID")))?;
    let employee_id = header(headers, EMPLOYEE_HEADER)?
        .parse::<Uuid>()
        .map_err(|_| AppError::Unauthorized(format!("{EMPLOYEE_HEADER} is not a valid UUID")))?;
    let role = header(headers, ROLE_HEADER)?
        .parse::<CallerRole>()
        .map_err(AppError::Unauthorized)?;
    Ok(AuthContext::new(tenant_id, employee_id, role))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    let value = headers
        .get(name)
        .ok_or_else(|| AppError::Unauthorized(format!("missing {name} header")))?;
    let value = value
        .to_str()
        .map_err(|_| AppError::Unauthorized(format!("invalid {name} header encoding")))?;
    Ok(value.trim())
}

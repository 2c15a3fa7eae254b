//! Workflow instance handlers for the REST API.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use hrflow_core::repository::instance::InstanceFilter;
use hrflow_types::instance::{InstanceDetail, StartInstanceRequest, WorkflowInstance};

use crate::http::error::AppError;
use crate::http::extractors::caller::Caller;
use crate::http::extractors::query::InstanceListQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Body of `POST /instances/{id}/cancel`.
#[derive(Debug, Default, Deserialize)]
pub struct CancelInstanceBody {
    #[serde(default)]
    pub reason: Option<String>,
}

fn instance_links<T: serde::Serialize>(resp: ApiResponse<T>, id: &Uuid) -> ApiResponse<T> {
    resp.with_link("self", &format!("/api/v1/instances/{id}"))
}

/// GET /api/v1/instances - Newest first.
pub async fn list_instances(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Query(query): Query<InstanceListQuery>,
) -> Result<ApiResponse<Vec<WorkflowInstance>>, AppError> {
    let start = Instant::now();
    let filter = InstanceFilter::try_from(query)?;
    let instances = state.engine.instances.list(&auth, &filter).await?;
    Ok(ApiResponse::success(instances, start).with_link("self", "/api/v1/instances"))
}

/// POST /api/v1/instances - Start an instance and open its first step.
pub async fn start_instance(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Json(body): Json<StartInstanceRequest>,
) -> Result<ApiResponse<InstanceDetail>, AppError> {
    let start = Instant::now();
    let detail = state.engine.instances.start(&auth, body).await?;
    let id = detail.instance.id;
    Ok(instance_links(ApiResponse::success(detail, start), &id))
}

/// GET /api/v1/instances/{id} - The instance with its step history.
pub async fn get_instance(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<InstanceDetail>, AppError> {
    let start = Instant::now();
    let detail = state.engine.instances.get_detail(&auth, &id).await?;
    Ok(instance_links(ApiResponse::success(detail, start), &id))
}

/// POST /api/v1/instances/{id}/cancel - HR only.
pub async fn cancel_instance(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelInstanceBody>,
) -> Result<ApiResponse<WorkflowInstance>, AppError> {
    let start = Instant::now();
    let instance = state.engine.instances.cancel(&auth, &id, body.reason).await?;
    Ok(instance_links(ApiResponse::success(instance, start), &id))
}

/// POST /api/v1/instances/{id}/expire - Scheduler hook; idempotent.
pub async fn expire_instance(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<WorkflowInstance>, AppError> {
    let start = Instant::now();
    let instance = state.engine.instances.expire(&auth, &id).await?;
    Ok(instance_links(ApiResponse::success(instance, start), &id))
}

//! Workflow definition handlers for the REST API.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use uuid::Uuid;

use hrflow_core::repository::definition::DefinitionFilter;
use hrflow_types::workflow::{CreateDefinitionRequest, UpdateDefinitionRequest, WorkflowDefinition};

use crate::http::error::AppError;
use crate::http::extractors::caller::Caller;
use crate::http::extractors::query::DefinitionListQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

type DefinitionResponse = Result<ApiResponse<WorkflowDefinition>, AppError>;

/// Body of `POST /definitions/{id}/clone`.
#[derive(Debug, Deserialize)]
pub struct CloneDefinitionBody {
    pub name: String,
}

fn with_links(resp: ApiResponse<WorkflowDefinition>) -> ApiResponse<WorkflowDefinition> {
    let id = resp.data.as_ref().map(|d| d.id.to_string()).unwrap_or_default();
    resp.with_link("self", &format!("/api/v1/definitions/{id}"))
        .with_link("export", &format!("/api/v1/definitions/{id}/export"))
}

/// GET /api/v1/definitions - Tenant definitions plus global templates.
pub async fn list_definitions(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Query(query): Query<DefinitionListQuery>,
) -> Result<ApiResponse<Vec<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let filter = DefinitionFilter::from(query);
    let defs = state.engine.store.list(&auth, &filter).await?;
    Ok(ApiResponse::success(defs, start).with_link("self", "/api/v1/definitions"))
}

/// POST /api/v1/definitions - Create a definition in the caller's tenant.
pub async fn create_definition(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Json(body): Json<CreateDefinitionRequest>,
) -> DefinitionResponse {
    let start = Instant::now();
    let def = state.engine.store.create(&auth, body).await?;
    Ok(with_links(ApiResponse::success(def, start)))
}

/// POST /api/v1/definitions/import - Create a definition from a YAML body.
pub async fn import_definition(
    State(state): State<AppState>,
    Caller(auth): Caller,
    body: String,
) -> DefinitionResponse {
    let start = Instant::now();
    let def = state.engine.store.import_yaml(&auth, &body).await?;
    Ok(with_links(ApiResponse::success(def, start)))
}

/// GET /api/v1/definitions/{id}
pub async fn get_definition(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path(id): Path<Uuid>,
) -> DefinitionResponse {
    let start = Instant::now();
    let def = state.engine.store.get(&auth, &id).await?;
    Ok(with_links(ApiResponse::success(def, start)))
}

/// GET /api/v1/definitions/slug/{slug} - Tenant slug first, then global.
pub async fn get_definition_by_slug(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path(slug): Path<String>,
) -> DefinitionResponse {
    let start = Instant::now();
    let def = state.engine.store.get_by_slug(&auth, &slug).await?;
    Ok(with_links(ApiResponse::success(def, start)))
}

/// GET /api/v1/definitions/{id}/export - The definition as a YAML document.
pub async fn export_definition(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let yaml = state.engine.store.export_yaml(&auth, &id).await?;
    Ok(([(header::CONTENT_TYPE, "application/yaml")], yaml).into_response())
}

/// PUT /api/v1/definitions/{id} - Partial update.
pub async fn update_definition(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateDefinitionRequest>,
) -> DefinitionResponse {
    let start = Instant::now();
    let def = state.engine.store.update(&auth, &id, body).await?;
    Ok(with_links(ApiResponse::success(def, start)))
}

/// POST /api/v1/definitions/{id}/clone - Copy into the caller's tenant (inactive).
pub async fn clone_definition(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<CloneDefinitionBody>,
) -> DefinitionResponse {
    let start = Instant::now();
    let def = state.engine.store.clone_definition(&auth, &id, &body.name).await?;
    Ok(with_links(ApiResponse::success(def, start)))
}

/// DELETE /api/v1/definitions/{id} - Soft delete (deactivate).
pub async fn delete_definition(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path(id): Path<Uuid>,
) -> DefinitionResponse {
    let start = Instant::now();
    let def = state.engine.store.delete(&auth, &id).await?;
    Ok(with_links(ApiResponse::success(def, start)))
}

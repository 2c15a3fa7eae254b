//! Dashboard aggregates for the calling employee's tenant.

use std::time::Instant;

use axum::extract::State;

use hrflow_types::instance::DashboardSummary;

use crate::http::error::AppError;
use crate::http::extractors::caller::Caller;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/dashboard
pub async fn get_dashboard(
    State(state): State<AppState>,
    Caller(auth): Caller,
) -> Result<ApiResponse<DashboardSummary>, AppError> {
    let start = Instant::now();
    let summary = state.engine.dashboard.summary(&auth).await?;
    Ok(ApiResponse::success(summary, start)
        .with_link("self", "/api/v1/dashboard")
        .with_link("pending", "/api/v1/steps/pending"))
}

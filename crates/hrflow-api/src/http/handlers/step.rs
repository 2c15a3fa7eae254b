//! Step action handlers: pending list, claim, complete, decide, skip,
//! parallel branches and the scheduler timer hook.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use hrflow_core::workflow::advancer::AdvanceResult;
use hrflow_core::workflow::steps::BranchResult;
use hrflow_types::instance::{ApprovalStatus, StepInstance};
use hrflow_types::workflow::TransitionTrigger;

use crate::http::error::AppError;
use crate::http::extractors::caller::Caller;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CompleteStepBody {
    /// Form data or acknowledgement details, stored on the step.
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct DecideStepBody {
    pub decision: ApprovalStatus,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SkipStepBody {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FireTimerBody {
    /// `due_date_reached`, `timeout` or `escalation`.
    pub trigger: TransitionTrigger,
}

/// Response of the timer hook. `fired` is false when nothing changed.
#[derive(Debug, Serialize)]
pub struct TimerOutcome {
    pub fired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AdvanceResult>,
}

fn advanced(result: AdvanceResult, start: Instant) -> ApiResponse<AdvanceResult> {
    let instance_id = result.instance.id;
    ApiResponse::success(result, start).with_link("instance", &format!("/api/v1/instances/{instance_id}"))
}

/// GET /api/v1/steps/pending - Open steps (and branches) assigned to the caller.
pub async fn list_pending_steps(
    State(state): State<AppState>,
    Caller(auth): Caller,
) -> Result<ApiResponse<Vec<StepInstance>>, AppError> {
    let start = Instant::now();
    let steps = state.engine.steps.list_my_pending(&auth).await?;
    Ok(ApiResponse::success(steps, start).with_link("self", "/api/v1/steps/pending"))
}

/// GET /api/v1/steps/{id}
pub async fn get_step(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<StepInstance>, AppError> {
    let start = Instant::now();
    let step = state.engine.steps.get(&auth, &id).await?;
    let instance_id = step.instance_id;
    Ok(ApiResponse::success(step, start)
        .with_link("self", &format!("/api/v1/steps/{id}"))
        .with_link("instance", &format!("/api/v1/instances/{instance_id}")))
}

/// POST /api/v1/steps/{id}/claim
pub async fn claim_step(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<StepInstance>, AppError> {
    let start = Instant::now();
    let step = state.engine.steps.claim(&auth, &id).await?;
    Ok(ApiResponse::success(step, start).with_link("self", &format!("/api/v1/steps/{id}")))
}

/// POST /api/v1/steps/{id}/complete
pub async fn complete_step(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<CompleteStepBody>,
) -> Result<ApiResponse<AdvanceResult>, AppError> {
    let start = Instant::now();
    let result = state.engine.steps.complete(&auth, &id, body.payload).await?;
    Ok(advanced(result, start))
}

/// POST /api/v1/steps/{id}/decide - Approve or reject an approval step.
pub async fn decide_step(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<DecideStepBody>,
) -> Result<ApiResponse<AdvanceResult>, AppError> {
    let start = Instant::now();
    let result = state
        .engine
        .steps
        .decide(&auth, &id, body.decision, body.comment)
        .await?;
    Ok(advanced(result, start))
}

/// POST /api/v1/steps/{id}/skip
pub async fn skip_step(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<SkipStepBody>,
) -> Result<ApiResponse<AdvanceResult>, AppError> {
    let start = Instant::now();
    let result = state.engine.steps.skip(&auth, &id, body.reason).await?;
    Ok(advanced(result, start))
}

/// POST /api/v1/steps/{id}/branches/{branch} - Record one parallel branch.
pub async fn complete_branch(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path((id, branch)): Path<(Uuid, String)>,
    Json(body): Json<CompleteStepBody>,
) -> Result<ApiResponse<BranchResult>, AppError> {
    let start = Instant::now();
    let result = state
        .engine
        .steps
        .complete_branch(&auth, &id, &branch, body.payload)
        .await?;
    Ok(ApiResponse::success(result, start).with_link("step", &format!("/api/v1/steps/{id}")))
}

/// POST /api/v1/steps/{id}/timer - Scheduler entry point; idempotent.
pub async fn fire_step_timer(
    State(state): State<AppState>,
    Caller(auth): Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<FireTimerBody>,
) -> Result<ApiResponse<TimerOutcome>, AppError> {
    let start = Instant::now();
    let result = state.engine.steps.fire_timer(&auth, &id, body.trigger).await?;
    let outcome = TimerOutcome {
        fired: result.is_some(),
        result,
    };
    Ok(ApiResponse::success(outcome, start))
}

//! The workflow advancer: moves an instance from a finished step to the next.
//!
//! Advancement is computed entirely in memory as a [`StateCommit`] and then
//! applied by the repository in one transaction guarded by the instance
//! revision. Callers hold the instance's [`InstanceLocks`] entry for the whole
//! read-plan-commit cycle.
//!
//! [`InstanceLocks`]: super::locks::InstanceLocks

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use hrflow_types::config::RejectionRouting;
use hrflow_types::error::EngineError;
use hrflow_types::instance::{
    BranchProgress, InstanceStatus, StepInstance, StepOutcome, StepStatus, WorkflowInstance,
};
use hrflow_types::workflow::{END_STEP, StepConfig, StepDefinition, StepType, WorkflowDefinition};
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::assignee::AssigneeResolver;
use super::condition::guard_document;
use super::expression::{ConditionEvaluator, instance_expression_context};
use super::matcher::{self, Route};
use crate::repository::definition::DefinitionRepository;
use crate::repository::directory::EmployeeDirectory;
use crate::repository::instance::{InstanceRepository, StateCommit};

/// Result of a committed advancement.
#[derive(Debug, Clone, Serialize)]
pub struct AdvanceResult {
    /// Instance state after the commit.
    pub instance: WorkflowInstance,
    /// The step that was closed.
    pub closed_step: StepInstance,
    /// Step instances created by the advancement, in order. Conditional
    /// steps appear here already completed; the last entry is the new open
    /// step unless the instance finished or blocked.
    pub opened_steps: Vec<StepInstance>,
}

pub struct WorkflowAdvancer<DR, IR, D>
where
    DR: DefinitionRepository,
    IR: InstanceRepository,
    D: EmployeeDirectory,
{
    definitions: Arc<DR>,
    instances: Arc<IR>,
    resolver: AssigneeResolver<D>,
    routing: RejectionRouting,
}

impl<DR, IR, D> WorkflowAdvancer<DR, IR, D>
where
    DR: DefinitionRepository,
    IR: InstanceRepository,
    D: EmployeeDirectory,
{
    pub fn new(
        definitions: Arc<DR>,
        instances: Arc<IR>,
        directory: Arc<D>,
        routing: RejectionRouting,
    ) -> Self {
        Self {
            definitions,
            instances,
            resolver: AssigneeResolver::new(directory),
            routing,
        }
    }

    pub fn routing(&self) -> RejectionRouting {
        self.routing
    }

    pub fn resolver(&self) -> &AssigneeResolver<D> {
        &self.resolver
    }

    /// Close `closing` (already marked completed/skipped by the caller) and
    /// move `instance` on, committing everything atomically.
    pub async fn advance(
        &self,
        instance: WorkflowInstance,
        closing: StepInstance,
        outcome: StepOutcome,
    ) -> Result<AdvanceResult, EngineError> {
        let def = self.definition_for(&instance).await?;
        self.advance_with(&def, instance, closing, outcome).await
    }

    /// [`advance`](Self::advance) with the instance's definition already
    /// loaded.
    pub async fn advance_with(
        &self,
        def: &WorkflowDefinition,
        instance: WorkflowInstance,
        closing: StepInstance,
        outcome: StepOutcome,
    ) -> Result<AdvanceResult, EngineError> {
        let now = Utc::now();
        let commit = self.plan_advance(def, instance, closing, outcome, now).await?;
        self.instances.commit(&commit).await?;

        let StateCommit {
            instance,
            mut updated_steps,
            inserted_steps,
            ..
        } = commit;
        let closed_step = updated_steps
            .pop()
            .ok_or_else(|| EngineError::Storage("advancement closed no step".to_string()))?;

        tracing::info!(
            instance_id = %instance.id,
            from_step = %closed_step.step_id,
            to_step = instance.current_step_id.as_deref().unwrap_or("-"),
            outcome = %outcome,
            status = %instance.status,
            "workflow advanced"
        );

        Ok(AdvanceResult {
            instance,
            closed_step,
            opened_steps: inserted_steps,
        })
    }

    /// Compute the commit for closing a step. Pure apart from assignee
    /// lookups.
    pub async fn plan_advance(
        &self,
        def: &WorkflowDefinition,
        mut instance: WorkflowInstance,
        closing: StepInstance,
        outcome: StepOutcome,
        now: DateTime<Utc>,
    ) -> Result<StateCommit, EngineError> {
        if instance.is_terminal() {
            return Err(EngineError::bad_request(format!(
                "workflow instance is {}",
                instance.status
            )));
        }
        if instance.current_step_id.as_deref() != Some(closing.step_id.as_str()) {
            return Err(EngineError::Conflict(format!(
                "step '{}' is not the current step",
                closing.step_id
            )));
        }
        if def.step(&closing.step_id).is_none() {
            return Err(EngineError::Conflict(format!(
                "step '{}' is not part of definition version {}",
                closing.step_id, def.version
            )));
        }

        let expected_revision = instance.revision;
        instance.record_completed(&closing.step_id);

        let guard_doc = guard_document(
            &instance.context_data,
            closing.payload.as_ref(),
            outcome,
            &instance.subject_employee_id,
        );
        let route = matcher::route(def, &closing.step_id, outcome, self.routing, &guard_doc);
        let order = instance.next_step_order().max(closing.step_order + 1);

        let inserted_steps = self
            .land(def, &mut instance, route, &closing.step_id, outcome, order, now)
            .await?;

        instance.revision = expected_revision + 1;
        instance.updated_at = now;

        Ok(StateCommit {
            instance,
            expected_revision,
            updated_steps: vec![closing],
            inserted_steps,
        })
    }

    /// Place a freshly created instance on its first step. Returns the step
    /// instances to insert alongside it.
    pub async fn plan_start(
        &self,
        def: &WorkflowDefinition,
        instance: &mut WorkflowInstance,
        now: DateTime<Utc>,
    ) -> Result<Vec<StepInstance>, EngineError> {
        let first = def
            .first_step()
            .ok_or_else(|| EngineError::bad_request("workflow definition has no steps"))?;
        let route = Route::Step {
            step: first,
            transition_id: None,
        };
        self.land(def, instance, route, &first.id, StepOutcome::Completed, 1, now)
            .await
    }

    /// Follow `route` until a step that needs a person is opened, or the
    /// instance finishes or blocks. Conditional steps are evaluated and
    /// recorded as completed along the way.
    #[allow(clippy::too_many_arguments)]
    async fn land<'a>(
        &self,
        def: &'a WorkflowDefinition,
        instance: &mut WorkflowInstance,
        mut route: Route<'a>,
        from_step_id: &str,
        outcome: StepOutcome,
        mut order: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<StepInstance>, EngineError> {
        let mut inserted = Vec::new();
        let mut last_step_id = from_step_id.to_string();
        let mut last_outcome = outcome;
        let mut conditional_hops = 0usize;

        loop {
            let step = match route {
                Route::End { .. } => {
                    finalize(instance, now);
                    return Ok(inserted);
                }
                Route::Blocked => {
                    block(instance, &last_step_id, last_outcome, now);
                    return Ok(inserted);
                }
                Route::Step { step, .. } => step,
            };

            let StepConfig::Conditional {
                condition,
                then_step,
                else_step,
            } = &step.config
            else {
                let opened = self.open_step(def, step, instance, order, now).await?;
                instance.current_step_id = Some(step.id.clone());
                instance.status = if step.step_type() == StepType::Approval {
                    InstanceStatus::AwaitingApproval
                } else {
                    InstanceStatus::InProgress
                };
                inserted.push(opened);
                return Ok(inserted);
            };

            conditional_hops += 1;
            if conditional_hops > def.steps.len() {
                tracing::warn!(
                    instance_id = %instance.id,
                    step_id = %step.id,
                    "conditional routing did not settle"
                );
                block(instance, &step.id, last_outcome, now);
                return Ok(inserted);
            }

            let (result, error) = evaluate_condition(
                condition,
                &instance.context_data,
                &instance.subject_employee_id,
            );
            let mut payload = json!({ "condition": condition, "result": result });
            if let Some(error) = error {
                tracing::warn!(
                    instance_id = %instance.id,
                    step_id = %step.id,
                    error = %error,
                    "condition evaluation failed, taking the false branch"
                );
                payload["error"] = Value::String(error);
            }

            let mut evaluated = new_step_instance(instance, step, order, now);
            evaluated.status = StepStatus::Completed;
            evaluated.started_at = Some(now);
            evaluated.completed_at = Some(now);
            evaluated.payload = Some(payload);
            instance.record_completed(&step.id);
            order = instance.next_step_order().max(order + 1);

            let step_outcome = StepOutcome::ConditionEvaluated { result };
            let branch = if result { then_step } else { else_step };
            route = match branch.as_deref() {
                Some(END_STEP) => Route::End { transition_id: None },
                Some(target) => match def.step(target) {
                    Some(next) => Route::Step {
                        step: next,
                        transition_id: None,
                    },
                    None => Route::Blocked,
                },
                None => {
                    let guard_doc = guard_document(
                        &instance.context_data,
                        evaluated.payload.as_ref(),
                        step_outcome,
                        &instance.subject_employee_id,
                    );
                    matcher::route(def, &step.id, step_outcome, self.routing, &guard_doc)
                }
            };
            inserted.push(evaluated);
            last_step_id = step.id.clone();
            last_outcome = step_outcome;
        }
    }

    /// Build the open step instance for `step`, resolving its assignee(s).
    async fn open_step(
        &self,
        def: &WorkflowDefinition,
        step: &StepDefinition,
        instance: &WorkflowInstance,
        order: i32,
        now: DateTime<Utc>,
    ) -> Result<StepInstance, EngineError> {
        let subject = instance.subject_employee_id;
        let mut opened = new_step_instance(instance, step, order, now);
        opened.assignee_employee_id = self.resolver.resolve(step.assignee_role, &subject).await?;

        if step.step_type() == StepType::Approval {
            opened.status = StepStatus::Pending;
        } else {
            opened.status = StepStatus::InProgress;
            opened.started_at = Some(now);
        }

        opened.due_date = match &step.config {
            StepConfig::Wait {
                until: Some(until), ..
            } => Some(*until),
            StepConfig::Wait {
                duration_hours: Some(hours),
                ..
            } => Some(now + Duration::hours(i64::from(*hours))),
            _ => def
                .duration_hours_for(step)
                .map(|hours| now + Duration::hours(i64::from(hours))),
        };

        if let StepConfig::Parallel { branches, .. } = &step.config {
            for branch in branches {
                let assignee = self.resolver.resolve(branch.assignee_role, &subject).await?;
                opened.branches.push(BranchProgress {
                    branch_id: branch.id.clone(),
                    name: branch.name.clone(),
                    assignee_role: branch.assignee_role,
                    assignee_employee_id: assignee,
                    status: StepStatus::Pending,
                    payload: None,
                    completed_at: None,
                    completed_by: None,
                });
            }
        }

        if opened.assignee_employee_id.is_none() && opened.branches.is_empty() {
            tracing::debug!(
                instance_id = %instance.id,
                step_id = %step.id,
                role = %step.assignee_role,
                "step opened without an assignee"
            );
        }

        Ok(opened)
    }

    /// The definition at the version `instance` captured when it started.
    ///
    /// The live definition is used only while its version still matches,
    /// which covers rows stored before version snapshots existed.
    pub async fn definition_for(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<WorkflowDefinition, EngineError> {
        let (id, version) = (&instance.definition_id, instance.definition_version);
        if let Some(def) = self.definitions.get_version(id, version).await? {
            return Ok(def);
        }
        match self.definitions.get(id).await? {
            Some(def) if def.version == version => Ok(def),
            Some(def) => {
                tracing::error!(
                    instance_id = %instance.id,
                    definition_id = %id,
                    captured = version,
                    current = def.version,
                    "captured definition version has no snapshot"
                );
                Err(EngineError::Conflict(format!(
                    "definition version {version} is not available"
                )))
            }
            None => Err(EngineError::not_found("workflow definition")),
        }
    }
}

fn new_step_instance(
    instance: &WorkflowInstance,
    step: &StepDefinition,
    order: i32,
    now: DateTime<Utc>,
) -> StepInstance {
    StepInstance {
        id: Uuid::now_v7(),
        instance_id: instance.id,
        step_id: step.id.clone(),
        step_name: step.name.clone(),
        step_type: step.step_type(),
        step_order: order,
        assignee_role: step.assignee_role,
        assignee_employee_id: None,
        status: StepStatus::Pending,
        approval_status: None,
        payload: None,
        branches: Vec::new(),
        due_date: None,
        started_at: None,
        completed_at: None,
        completed_by: None,
        approver_employee_id: None,
        approved_at: None,
        approver_comment: None,
        skip_reason: None,
        created_at: now,
    }
}

/// Evaluate a conditional step. Evaluation errors count as `false`.
fn evaluate_condition(
    expression: &str,
    context_data: &Value,
    subject_employee_id: &Uuid,
) -> (bool, Option<String>) {
    let evaluator = ConditionEvaluator::new();
    let ctx = instance_expression_context(context_data, subject_employee_id);
    match evaluator.evaluate_bool(expression, &ctx) {
        Ok(result) => (result, None),
        Err(e) => (false, Some(e.to_string())),
    }
}

fn finalize(instance: &mut WorkflowInstance, now: DateTime<Utc>) {
    instance.status = InstanceStatus::Completed;
    instance.current_step_id = None;
    instance.completed_at = Some(now);
}

fn block(instance: &mut WorkflowInstance, step_id: &str, outcome: StepOutcome, now: DateTime<Utc>) {
    instance.status = InstanceStatus::Blocked;
    instance.current_step_id = None;
    set_context_entry(
        &mut instance.context_data,
        "blocked",
        json!({
            "step_id": step_id,
            "outcome": outcome.to_string(),
            "at": now.to_rfc3339(),
        }),
    );
    tracing::warn!(
        instance_id = %instance.id,
        step_id,
        outcome = %outcome,
        "no transition matched, instance blocked"
    );
}

/// Insert `key` into the instance context, turning a non-object context into
/// `{ "value": <old>, key: ... }`.
pub(crate) fn set_context_entry(context: &mut Value, key: &str, value: Value) {
    if !context.is_object() {
        let previous = context.take();
        *context = if previous.is_null() {
            json!({})
        } else {
            json!({ "value": previous })
        };
    }
    if let Some(map) = context.as_object_mut() {
        map.insert(key.to_string(), value);
    }
}

//! Step actions: complete, decide, skip, claim, parallel branches and timers.
//!
//! Every mutating action runs under the instance lock, re-reads the step and
//! its instance, checks the caller, applies the actor's change to the step and
//! hands it to the advancer (or, for partial progress, commits the step alone).

use std::sync::Arc;

use chrono::Utc;
use hrflow_types::auth::AuthContext;
use hrflow_types::error::EngineError;
use hrflow_types::instance::{
    ApprovalStatus, StepInstance, StepOutcome, StepStatus, WorkflowInstance,
};
use hrflow_types::workflow::{StepConfig, StepType, TransitionTrigger};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use super::advancer::{AdvanceResult, WorkflowAdvancer};
use super::condition::guard_document;
use super::locks::InstanceLocks;
use super::matcher::select_transition;
use crate::repository::definition::DefinitionRepository;
use crate::repository::directory::EmployeeDirectory;
use crate::repository::instance::{InstanceRepository, StateCommit};

/// Result of recording one parallel branch.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", content = "data", rename_all = "snake_case")]
pub enum BranchResult {
    /// The branch was recorded; the parallel step is still open.
    Recorded(StepInstance),
    /// The completion policy was met and the instance advanced.
    Advanced(AdvanceResult),
}

/// Owns actor decisions on step instances.
pub struct StepInstanceManager<DR, IR, D>
where
    DR: DefinitionRepository,
    IR: InstanceRepository,
    D: EmployeeDirectory,
{
    instances: Arc<IR>,
    advancer: Arc<WorkflowAdvancer<DR, IR, D>>,
    locks: InstanceLocks,
}

/// A step and its instance, read under the instance lock.
struct Locked {
    instance: WorkflowInstance,
    step: StepInstance,
    _guard: OwnedMutexGuard<()>,
}

impl<DR, IR, D> StepInstanceManager<DR, IR, D>
where
    DR: DefinitionRepository,
    IR: InstanceRepository,
    D: EmployeeDirectory,
{
    pub fn new(
        instances: Arc<IR>,
        advancer: Arc<WorkflowAdvancer<DR, IR, D>>,
        locks: InstanceLocks,
    ) -> Self {
        Self {
            instances,
            advancer,
            locks,
        }
    }

    /// Open steps assigned to the caller, earliest due first.
    pub async fn list_my_pending(&self, auth: &AuthContext) -> Result<Vec<StepInstance>, EngineError> {
        Ok(self
            .instances
            .list_open_steps_for_assignee(&auth.tenant_id, &auth.employee_id)
            .await?)
    }

    /// A single step instance within the caller's tenant.
    pub async fn get(&self, auth: &AuthContext, step_id: &Uuid) -> Result<StepInstance, EngineError> {
        let step = self
            .instances
            .get_step(step_id)
            .await?
            .ok_or_else(|| EngineError::not_found("step instance"))?;
        self.instances
            .get_instance(&step.instance_id)
            .await?
            .filter(|i| i.tenant_id == auth.tenant_id)
            .ok_or_else(|| EngineError::not_found("step instance"))?;
        Ok(step)
    }

    /// Take an open step.
    ///
    /// Unassigned steps may be claimed by anyone in the tenant; HR-privileged
    /// callers may take over any open step.
    pub async fn claim(&self, auth: &AuthContext, step_id: &Uuid) -> Result<StepInstance, EngineError> {
        let Locked {
            instance,
            mut step,
            _guard,
        } = self.lock_open(auth, step_id).await?;

        match step.assignee_employee_id {
            Some(current) if current == auth.employee_id => return Ok(step),
            Some(_) if !auth.is_hr_privileged() => {
                return Err(EngineError::forbidden("step is assigned to someone else"));
            }
            _ => {}
        }

        step.assignee_employee_id = Some(auth.employee_id);
        self.commit_step(instance, step.clone()).await?;
        tracing::info!(step_id = %step.id, employee_id = %auth.employee_id, "step claimed");
        Ok(step)
    }

    /// Complete a form, review, notification or wait step.
    pub async fn complete(
        &self,
        auth: &AuthContext,
        step_id: &Uuid,
        payload: Option<Value>,
    ) -> Result<AdvanceResult, EngineError> {
        let Locked {
            instance,
            mut step,
            _guard: guard,
        } = self.lock_open(auth, step_id).await?;
        authorize_actor(auth, &step)?;

        match step.step_type {
            StepType::Approval => {
                return Err(EngineError::bad_request(
                    "approval steps are finished with a decision",
                ));
            }
            StepType::Parallel => {
                return Err(EngineError::bad_request(
                    "parallel steps are finished branch by branch",
                ));
            }
            _ => {}
        }

        let now = Utc::now();
        step.status = StepStatus::Completed;
        step.payload = payload;
        step.started_at.get_or_insert(now);
        step.completed_at = Some(now);
        step.completed_by = Some(auth.employee_id);

        let result = self
            .advancer
            .advance(instance, step, StepOutcome::Completed)
            .await?;
        self.release(guard, &result.instance);
        Ok(result)
    }

    /// Approve or reject an approval step.
    pub async fn decide(
        &self,
        auth: &AuthContext,
        step_id: &Uuid,
        decision: ApprovalStatus,
        comment: Option<String>,
    ) -> Result<AdvanceResult, EngineError> {
        let Locked {
            instance,
            mut step,
            _guard: guard,
        } = self.lock_open(auth, step_id).await?;
        authorize_actor(auth, &step)?;

        if step.step_type != StepType::Approval {
            return Err(EngineError::bad_request(format!(
                "cannot decide a {} step",
                step.step_type
            )));
        }

        let def = self.advancer.definition_for(&instance).await?;
        let comment = comment.filter(|c| !c.trim().is_empty());
        let requires_comment = matches!(
            def.step(&step.step_id).map(|s| &s.config),
            Some(StepConfig::Approval {
                require_comment: true,
                ..
            })
        );
        if requires_comment && comment.is_none() {
            return Err(EngineError::bad_request("a comment is required"));
        }

        let now = Utc::now();
        step.status = StepStatus::Completed;
        step.approval_status = Some(decision);
        step.approver_employee_id = Some(auth.employee_id);
        step.approved_at = Some(now);
        step.approver_comment = comment;
        step.started_at.get_or_insert(now);
        step.completed_at = Some(now);
        step.completed_by = Some(auth.employee_id);

        let outcome = match decision {
            ApprovalStatus::Approved => StepOutcome::Approved,
            ApprovalStatus::Rejected => StepOutcome::Rejected,
        };
        let result = self.advancer.advance_with(&def, instance, step, outcome).await?;
        self.release(guard, &result.instance);
        Ok(result)
    }

    /// Skip an optional or skippable step; advances like a completion.
    pub async fn skip(
        &self,
        auth: &AuthContext,
        step_id: &Uuid,
        reason: Option<String>,
    ) -> Result<AdvanceResult, EngineError> {
        let Locked {
            instance,
            mut step,
            _guard: guard,
        } = self.lock_open(auth, step_id).await?;
        authorize_actor(auth, &step)?;

        let def = self.advancer.definition_for(&instance).await?;
        let skippable = def.step(&step.step_id).is_some_and(|s| s.can_skip());
        if !skippable {
            return Err(EngineError::bad_request(format!(
                "step '{}' is neither optional nor skippable",
                step.step_id
            )));
        }

        let now = Utc::now();
        step.status = StepStatus::Skipped;
        step.skip_reason = reason;
        step.completed_at = Some(now);
        step.completed_by = Some(auth.employee_id);

        let result = self
            .advancer
            .advance_with(&def, instance, step, StepOutcome::Skipped)
            .await?;
        self.release(guard, &result.instance);
        Ok(result)
    }

    /// Record one branch of a parallel step. Once the step's completion
    /// policy is met the step completes and the instance advances.
    pub async fn complete_branch(
        &self,
        auth: &AuthContext,
        step_id: &Uuid,
        branch_id: &str,
        payload: Option<Value>,
    ) -> Result<BranchResult, EngineError> {
        let Locked {
            instance,
            mut step,
            _guard: guard,
        } = self.lock_open(auth, step_id).await?;

        if step.step_type != StepType::Parallel {
            return Err(EngineError::bad_request(format!(
                "step '{}' has no parallel branches",
                step.step_id
            )));
        }

        let step_assignee = step.assignee_employee_id;
        let branch = step
            .branches
            .iter_mut()
            .find(|b| b.branch_id == branch_id)
            .ok_or_else(|| EngineError::not_found(format!("parallel branch '{branch_id}'")))?;
        if !branch.status.is_open() {
            return Err(EngineError::bad_request(format!(
                "branch '{branch_id}' is already {}",
                branch.status
            )));
        }
        let allowed = auth.is_hr_privileged()
            || branch.assignee_employee_id == Some(auth.employee_id)
            || (branch.assignee_employee_id.is_none() && step_assignee == Some(auth.employee_id));
        if !allowed {
            return Err(EngineError::forbidden("branch is assigned to someone else"));
        }

        let now = Utc::now();
        branch.status = StepStatus::Completed;
        branch.payload = payload;
        branch.completed_at = Some(now);
        branch.completed_by = Some(auth.employee_id);

        let def = self.advancer.definition_for(&instance).await?;
        let policy = match def.step(&step.step_id).map(|s| &s.config) {
            Some(StepConfig::Parallel { completion, .. }) => *completion,
            _ => Default::default(),
        };
        let done = step
            .branches
            .iter()
            .filter(|b| b.status == StepStatus::Completed)
            .count();
        let total = step.branches.len();

        if !policy.is_satisfied(done, total) {
            tracing::debug!(
                step_id = %step.id,
                branch_id,
                done,
                total,
                "parallel branch recorded"
            );
            self.commit_step(instance, step.clone()).await?;
            return Ok(BranchResult::Recorded(step));
        }

        step.skip_open_branches();
        let outputs: Map<String, Value> = step
            .branches
            .iter()
            .filter(|b| b.status == StepStatus::Completed)
            .filter_map(|b| Some((b.branch_id.clone(), b.payload.clone()?)))
            .collect();
        step.status = StepStatus::Completed;
        step.payload = Some(serde_json::json!({ "branches": outputs }));
        step.started_at.get_or_insert(now);
        step.completed_at = Some(now);
        step.completed_by = Some(auth.employee_id);

        let result = self
            .advancer
            .advance_with(&def, instance, step, StepOutcome::ParallelComplete)
            .await?;
        self.release(guard, &result.instance);
        Ok(BranchResult::Advanced(result))
    }

    /// Scheduler entry point for timer triggers.
    ///
    /// Idempotent: a step that is already closed, or that has no transition
    /// for `trigger`, is left alone and `Ok(None)` is returned.
    pub async fn fire_timer(
        &self,
        auth: &AuthContext,
        step_id: &Uuid,
        trigger: TransitionTrigger,
    ) -> Result<Option<AdvanceResult>, EngineError> {
        auth.require_hr("fire step timers")?;
        if !trigger.is_timer() {
            return Err(EngineError::bad_request(format!(
                "'{trigger}' is not a timer trigger"
            )));
        }

        let Some(Locked {
            instance,
            mut step,
            _guard: guard,
        }) = self.lock(auth, step_id).await?
        else {
            return Err(EngineError::not_found("step instance"));
        };
        if !step.is_open() || instance.is_terminal() {
            tracing::debug!(step_id = %step.id, %trigger, "timer fired on a closed step");
            return Ok(None);
        }

        let def = self.advancer.definition_for(&instance).await?;
        let outcome = StepOutcome::Timer { trigger };
        let guard_doc = guard_document(
            &instance.context_data,
            step.payload.as_ref(),
            outcome,
            &instance.subject_employee_id,
        );
        if select_transition(&def, &step.step_id, outcome, self.advancer.routing(), &guard_doc)
            .is_none()
        {
            tracing::debug!(step_id = %step.id, %trigger, "no transition for timer");
            return Ok(None);
        }

        let now = Utc::now();
        step.status = StepStatus::Completed;
        step.started_at.get_or_insert(now);
        step.completed_at = Some(now);
        step.skip_open_branches();

        let result = self.advancer.advance_with(&def, instance, step, outcome).await?;
        self.release(guard, &result.instance);
        Ok(Some(result))
    }

    /// Persist a step change that does not move the instance.
    async fn commit_step(&self, mut instance: WorkflowInstance, step: StepInstance) -> Result<(), EngineError> {
        let expected_revision = instance.revision;
        instance.revision += 1;
        instance.updated_at = Utc::now();
        self.instances
            .commit(&StateCommit {
                instance,
                expected_revision,
                updated_steps: vec![step],
                inserted_steps: Vec::new(),
            })
            .await?;
        Ok(())
    }

    /// Unlock, dropping the lock entry once the instance is finished.
    fn release(&self, guard: OwnedMutexGuard<()>, instance: &WorkflowInstance) {
        drop(guard);
        if instance.is_terminal() {
            self.locks.release_idle(&instance.id);
        }
    }

    /// Lock the step's instance and re-read both. `None` if the step does not
    /// exist in the caller's tenant.
    async fn lock(&self, auth: &AuthContext, step_id: &Uuid) -> Result<Option<Locked>, EngineError> {
        let Some(unlocked) = self.instances.get_step(step_id).await? else {
            return Ok(None);
        };
        let guard = self.locks.acquire(unlocked.instance_id).await;

        let Some(instance) = self.instances.get_instance(&unlocked.instance_id).await? else {
            return Ok(None);
        };
        if instance.tenant_id != auth.tenant_id {
            return Ok(None);
        }
        let Some(step) = self.instances.get_step(step_id).await? else {
            return Ok(None);
        };
        Ok(Some(Locked {
            instance,
            step,
            _guard: guard,
        }))
    }

    /// [`lock`](Self::lock), requiring both the step and its instance to be
    /// open.
    async fn lock_open(&self, auth: &AuthContext, step_id: &Uuid) -> Result<Locked, EngineError> {
        let locked = self
            .lock(auth, step_id)
            .await?
            .ok_or_else(|| EngineError::not_found("step instance"))?;
        if locked.instance.is_terminal() {
            return Err(EngineError::bad_request(format!(
                "workflow instance is {}",
                locked.instance.status
            )));
        }
        if !locked.step.is_open() {
            return Err(EngineError::bad_request(format!(
                "step is already {}",
                locked.step.status
            )));
        }
        Ok(locked)
    }
}

/// The resolved assignee or an HR-privileged caller may act on a step.
fn authorize_actor(auth: &AuthContext, step: &StepInstance) -> Result<(), EngineError> {
    if auth.is_hr_privileged() || step.assignee_employee_id == Some(auth.employee_id) {
        return Ok(());
    }
    Err(EngineError::forbidden(match step.assignee_employee_id {
        Some(_) => "step is assigned to someone else",
        None => "step is unassigned; claim it first",
    }))
}

//! Instance lifecycle: start, cancel, expire and read access.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hrflow_types::auth::AuthContext;
use hrflow_types::error::EngineError;
use hrflow_types::instance::{
    InstanceDetail, InstanceStatus, StartInstanceRequest, StepStatus, WorkflowInstance,
};
use serde_json::{Value, json};
use uuid::Uuid;

use super::advancer::{WorkflowAdvancer, set_context_entry};
use super::locks::InstanceLocks;
use crate::repository::definition::DefinitionRepository;
use crate::repository::directory::EmployeeDirectory;
use crate::repository::instance::{InstanceFilter, InstanceRepository, StateCommit};

/// Bootstraps and terminates workflow instances.
pub struct InstanceManager<DR, IR, D>
where
    DR: DefinitionRepository,
    IR: InstanceRepository,
    D: EmployeeDirectory,
{
    definitions: Arc<DR>,
    instances: Arc<IR>,
    advancer: Arc<WorkflowAdvancer<DR, IR, D>>,
    locks: InstanceLocks,
    reference_prefix: String,
}

impl<DR, IR, D> InstanceManager<DR, IR, D>
where
    DR: DefinitionRepository,
    IR: InstanceRepository,
    D: EmployeeDirectory,
{
    pub fn new(
        definitions: Arc<DR>,
        instances: Arc<IR>,
        advancer: Arc<WorkflowAdvancer<DR, IR, D>>,
        locks: InstanceLocks,
        reference_prefix: impl Into<String>,
    ) -> Self {
        Self {
            definitions,
            instances,
            advancer,
            locks,
            reference_prefix: reference_prefix.into(),
        }
    }

    /// Start an instance of an active definition and open its first step.
    pub async fn start(
        &self,
        auth: &AuthContext,
        request: StartInstanceRequest,
    ) -> Result<InstanceDetail, EngineError> {
        let def = self
            .definitions
            .get(&request.definition_id)
            .await?
            .filter(|d| d.tenant_id.is_none_or(|t| t == auth.tenant_id))
            .ok_or_else(|| EngineError::not_found("workflow definition"))?;
        if !def.is_active {
            return Err(EngineError::bad_request(format!(
                "workflow definition '{}' is not active",
                def.slug
            )));
        }
        if request.source_type.trim().is_empty() {
            return Err(EngineError::bad_request("source_type must not be empty"));
        }

        let context_data = match request.context_data {
            None | Some(Value::Null) => json!({}),
            Some(obj @ Value::Object(_)) => obj,
            Some(_) => return Err(EngineError::bad_request("context_data must be a JSON object")),
        };

        let now = Utc::now();
        let mut instance = WorkflowInstance {
            id: Uuid::now_v7(),
            tenant_id: auth.tenant_id,
            definition_id: def.id,
            definition_version: def.version,
            reference_number: reference_number(&self.reference_prefix, now),
            subject_employee_id: request.subject_employee_id,
            source_type: request.source_type,
            source_id: request.source_id,
            status: InstanceStatus::Pending,
            current_step_id: None,
            completed_step_ids: Vec::new(),
            context_data,
            started_by: Some(auth.employee_id),
            started_at: now,
            due_date: request.due_date,
            completed_at: None,
            updated_at: now,
            revision: 0,
        };

        let steps = self.advancer.plan_start(&def, &mut instance, now).await?;
        self.instances.create_instance(&instance, &steps).await?;

        tracing::info!(
            instance_id = %instance.id,
            reference = %instance.reference_number,
            definition = %def.slug,
            current_step = instance.current_step_id.as_deref().unwrap_or("-"),
            status = %instance.status,
            "workflow started"
        );

        Ok(InstanceDetail { instance, steps })
    }

    /// Cancel an instance. HR-privileged callers only.
    pub async fn cancel(
        &self,
        auth: &AuthContext,
        instance_id: &Uuid,
        reason: Option<String>,
    ) -> Result<WorkflowInstance, EngineError> {
        auth.require_hr("cancel workflows")?;
        let guard = self.locks.acquire(*instance_id).await;
        let instance = self.load(auth, instance_id).await?;
        if instance.is_terminal() {
            return Err(EngineError::bad_request(format!(
                "workflow instance is already {}",
                instance.status
            )));
        }

        let now = Utc::now();
        let skip_reason = match reason.as_deref() {
            Some(r) if !r.trim().is_empty() => format!("workflow cancelled: {r}"),
            _ => "workflow cancelled".to_string(),
        };
        let note = json!({
            "reason": reason,
            "cancelled_by": auth.employee_id,
            "cancelled_at": now.to_rfc3339(),
        });
        let instance = self
            .terminate(instance, InstanceStatus::Cancelled, "cancellation", note, &skip_reason, now)
            .await?;

        drop(guard);
        self.locks.release_idle(instance_id);
        tracing::info!(instance_id = %instance.id, by = %auth.employee_id, "workflow cancelled");
        Ok(instance)
    }

    /// Expire an instance on behalf of the external scheduler.
    ///
    /// Idempotent: a terminal instance is returned unchanged.
    pub async fn expire(
        &self,
        auth: &AuthContext,
        instance_id: &Uuid,
    ) -> Result<WorkflowInstance, EngineError> {
        auth.require_hr("expire workflows")?;
        let guard = self.locks.acquire(*instance_id).await;
        let instance = self.load(auth, instance_id).await?;
        if instance.is_terminal() {
            return Ok(instance);
        }

        let now = Utc::now();
        let note = json!({ "expired_at": now.to_rfc3339() });
        let instance = self
            .terminate(instance, InstanceStatus::Expired, "expiry", note, "workflow expired", now)
            .await?;

        drop(guard);
        self.locks.release_idle(instance_id);
        tracing::info!(instance_id = %instance.id, "workflow expired");
        Ok(instance)
    }

    /// List the caller tenant's instances, newest first.
    pub async fn list(
        &self,
        auth: &AuthContext,
        filter: &InstanceFilter,
    ) -> Result<Vec<WorkflowInstance>, EngineError> {
        Ok(self.instances.list_instances(&auth.tenant_id, filter).await?)
    }

    pub async fn get_by_id(
        &self,
        auth: &AuthContext,
        instance_id: &Uuid,
    ) -> Result<WorkflowInstance, EngineError> {
        self.load(auth, instance_id).await
    }

    /// An instance with its step history ordered by step order.
    pub async fn get_detail(
        &self,
        auth: &AuthContext,
        instance_id: &Uuid,
    ) -> Result<InstanceDetail, EngineError> {
        let instance = self.load(auth, instance_id).await?;
        let steps = self.instances.list_steps(&instance.id).await?;
        Ok(InstanceDetail { instance, steps })
    }

    async fn load(&self, auth: &AuthContext, instance_id: &Uuid) -> Result<WorkflowInstance, EngineError> {
        self.instances
            .get_instance(instance_id)
            .await?
            .filter(|i| i.tenant_id == auth.tenant_id)
            .ok_or_else(|| EngineError::not_found("workflow instance"))
    }

    /// Move an instance to a terminal status and skip its open steps, in one
    /// commit.
    async fn terminate(
        &self,
        mut instance: WorkflowInstance,
        status: InstanceStatus,
        context_key: &str,
        note: Value,
        skip_reason: &str,
        now: DateTime<Utc>,
    ) -> Result<WorkflowInstance, EngineError> {
        let mut open_steps: Vec<_> = self
            .instances
            .list_steps(&instance.id)
            .await?
            .into_iter()
            .filter(|s| s.is_open())
            .collect();
        for step in &mut open_steps {
            step.status = StepStatus::Skipped;
            step.skip_reason = Some(skip_reason.to_string());
            step.completed_at = Some(now);
            step.skip_open_branches();
        }

        let expected_revision = instance.revision;
        instance.status = status;
        instance.current_step_id = None;
        instance.completed_at = Some(now);
        instance.updated_at = now;
        instance.revision = expected_revision + 1;
        set_context_entry(&mut instance.context_data, context_key, note);

        let commit = StateCommit {
            instance,
            expected_revision,
            updated_steps: open_steps,
            inserted_steps: Vec::new(),
        };
        self.instances.commit(&commit).await?;
        Ok(commit.instance)
    }
}

/// `{prefix}-{YYYYMMDD}-{6 upper-case hex}`.
pub fn reference_number(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..6].to_uppercase();
    format!("{prefix}-{}-{suffix}", now.format("%Y%m%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestEngine, approval_step, form_step};

    #[test]
    fn test_reference_number_format() {
        let now = chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 3, 17, 9, 30, 0).unwrap();
        let reference = reference_number("WF", now);
        let parts: Vec<&str> = reference.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "WF");
        assert_eq!(parts[1], "20260317");
        assert_eq!(parts[2].len(), 6);
        assert!(
            parts[2]
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        );
    }

    #[tokio::test]
    async fn test_start_opens_first_step() {
        let engine = TestEngine::new();
        let def = engine.store_definition(vec![form_step("a"), form_step("b")]).await;

        let detail = engine.start(&def).await;
        assert_eq!(detail.instance.status, InstanceStatus::InProgress);
        assert_eq!(detail.instance.current_step_id.as_deref(), Some("a"));
        assert_eq!(detail.instance.definition_version, def.version);
        assert!(detail.instance.reference_number.starts_with("WF-"));
        assert_eq!(detail.steps.len(), 1);

        let stored = engine
            .instances
            .get_detail(&engine.hr, &detail.instance.id)
            .await
            .unwrap();
        assert_eq!(stored.steps.len(), 1);
        assert_eq!(stored.steps[0].status, StepStatus::InProgress);
    }

    #[tokio::test]
    async fn test_start_inactive_definition_is_bad_request() {
        let engine = TestEngine::new();
        let mut def = engine.definition(vec![form_step("a")]);
        def.is_active = false;
        engine.definition_repo.insert(def.clone());

        let err = engine
            .instances
            .start(&engine.hr, engine.start_request(&def))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_start_rejects_other_tenant_definition() {
        let engine = TestEngine::new();
        let mut def = engine.definition(vec![form_step("a")]);
        def.tenant_id = Some(Uuid::now_v7());
        engine.definition_repo.insert(def.clone());

        let err = engine
            .instances
            .start(&engine.hr, engine.start_request(&def))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_start_rejects_non_object_context() {
        let engine = TestEngine::new();
        let def = engine.store_definition(vec![form_step("a")]).await;
        let mut request = engine.start_request(&def);
        request.context_data = Some(json!([1, 2, 3]));
        let err = engine.instances.start(&engine.hr, request).await.unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_start_then_cancel_skips_open_step() {
        let engine = TestEngine::new();
        let def = engine.store_definition(vec![approval_step("a"), form_step("b")]).await;
        let detail = engine.start(&def).await;

        let cancelled = engine
            .instances
            .cancel(&engine.hr, &detail.instance.id, Some("duplicate request".to_string()))
            .await
            .unwrap();
        assert_eq!(cancelled.status, InstanceStatus::Cancelled);
        assert!(cancelled.current_step_id.is_none());
        assert!(cancelled.completed_at.is_some());
        assert_eq!(
            cancelled.context_data["cancellation"]["reason"],
            json!("duplicate request")
        );

        let stored = engine
            .instances
            .get_detail(&engine.hr, &detail.instance.id)
            .await
            .unwrap();
        assert_eq!(stored.steps.len(), 1);
        assert_eq!(stored.steps[0].status, StepStatus::Skipped);
        assert!(stored.steps.iter().all(|s| !s.is_open()));
        assert!(engine.locks.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_requires_hr_and_open_instance() {
        let engine = TestEngine::new();
        let def = engine.store_definition(vec![form_step("a")]).await;
        let detail = engine.start(&def).await;

        let err = engine
            .instances
            .cancel(&engine.employee, &detail.instance.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        engine
            .instances
            .cancel(&engine.hr, &detail.instance.id, None)
            .await
            .unwrap();
        let err = engine
            .instances
            .cancel(&engine.hr, &detail.instance.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_expire_is_idempotent() {
        let engine = TestEngine::new();
        let def = engine.store_definition(vec![form_step("a")]).await;
        let detail = engine.start(&def).await;

        let first = engine.instances.expire(&engine.hr, &detail.instance.id).await.unwrap();
        assert_eq!(first.status, InstanceStatus::Expired);
        let second = engine.instances.expire(&engine.hr, &detail.instance.id).await.unwrap();
        assert_eq!(second.status, InstanceStatus::Expired);
        assert_eq!(second.revision, first.revision);
        assert_eq!(second.completed_at, first.completed_at);
    }

    #[tokio::test]
    async fn test_instances_are_tenant_scoped() {
        let engine = TestEngine::new();
        let def = engine.store_definition(vec![form_step("a")]).await;
        let detail = engine.start(&def).await;

        let outsider = AuthContext::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            hrflow_types::auth::CallerRole::HrAdmin,
        );
        let err = engine
            .instances
            .get_by_id(&outsider, &detail.instance.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        assert!(
            engine
                .instances
                .list(&outsider, &InstanceFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            engine
                .instances
                .list(&engine.hr, &InstanceFilter::default())
                .await
                .unwrap()
                .len(),
            1
        );
    }
}

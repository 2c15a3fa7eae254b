//! In-memory repository doubles and fixtures for engine tests.

use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use hrflow_types::auth::{AuthContext, CallerRole};
use hrflow_types::config::EngineConfig;
use hrflow_types::error::RepositoryError;
use hrflow_types::instance::{
    InstanceDetail, InstanceStatus, StartInstanceRequest, StepInstance, StepStatus,
    WorkflowInstance,
};
use hrflow_types::workflow::{
    AssigneeRole, CompletionPolicy, ConditionCombinator, CreateDefinitionRequest,
    NotificationToggles, ParallelBranch, StepConfig, StepDefinition, TransitionDefinition,
    TransitionTrigger, WorkflowDefinition,
};
use serde_json::json;
use uuid::Uuid;

use crate::repository::definition::{DefinitionFilter, DefinitionRepository};
use crate::repository::directory::EmployeeDirectory;
use crate::repository::instance::{InstanceFilter, InstanceRepository, StateCommit};
use crate::workflow::engine::Engine;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn step(id: &str, role: AssigneeRole, config: StepConfig) -> StepDefinition {
    StepDefinition {
        id: id.to_string(),
        name: format!("Step {id}"),
        assignee_role: role,
        config,
        default_duration_hours: None,
        optional: false,
        skippable: false,
        notifications: NotificationToggles::default(),
    }
}

pub fn form_step(id: &str) -> StepDefinition {
    step(id, AssigneeRole::Employee, StepConfig::Form { form_key: None })
}

/// Approval by the subject's manager.
pub fn approval_step(id: &str) -> StepDefinition {
    step(
        id,
        AssigneeRole::Manager,
        StepConfig::Approval {
            escalate_to: None,
            require_comment: false,
        },
    )
}

pub fn wait_step(id: &str, hours: Option<u32>, until: Option<DateTime<Utc>>) -> StepDefinition {
    step(
        id,
        AssigneeRole::HrAdmin,
        StepConfig::Wait {
            duration_hours: hours,
            until,
            condition: None,
        },
    )
}

pub fn conditional_step(
    id: &str,
    condition: &str,
    then_step: Option<&str>,
    else_step: Option<&str>,
) -> StepDefinition {
    step(
        id,
        AssigneeRole::Employee,
        StepConfig::Conditional {
            condition: condition.to_string(),
            then_step: then_step.map(str::to_string),
            else_step: else_step.map(str::to_string),
        },
    )
}

pub fn parallel_step(
    id: &str,
    branches: &[(&str, AssigneeRole)],
    completion: CompletionPolicy,
) -> StepDefinition {
    step(
        id,
        AssigneeRole::HrManager,
        StepConfig::Parallel {
            branches: branches
                .iter()
                .map(|(branch_id, role)| ParallelBranch {
                    id: branch_id.to_string(),
                    name: format!("Branch {branch_id}"),
                    assignee_role: *role,
                })
                .collect(),
            completion,
        },
    )
}

pub fn transition(id: &str, from: &str, to: &str, trigger: TransitionTrigger) -> TransitionDefinition {
    TransitionDefinition {
        id: id.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        trigger,
        conditions: Vec::new(),
        combinator: ConditionCombinator::And,
        ui: None,
    }
}

/// An unsaved tenant definition.
pub fn definition(steps: Vec<StepDefinition>) -> WorkflowDefinition {
    let now = Utc::now();
    WorkflowDefinition {
        id: Uuid::now_v7(),
        tenant_id: Some(Uuid::now_v7()),
        name: "Test workflow".to_string(),
        slug: format!("test-workflow-{}", &Uuid::new_v4().simple().to_string()[..6]),
        description: None,
        module: Some("performance".to_string()),
        category: Some("review".to_string()),
        tags: Vec::new(),
        steps,
        transitions: Vec::new(),
        default_durations: HashMap::new(),
        reminder_policy: None,
        escalation_policies: Vec::new(),
        version: 1,
        is_template: false,
        is_active: true,
        is_system: false,
        created_by: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn create_request(name: &str, steps: Vec<StepDefinition>) -> CreateDefinitionRequest {
    CreateDefinitionRequest {
        name: name.to_string(),
        slug: None,
        description: None,
        module: None,
        category: None,
        tags: Vec::new(),
        steps,
        transitions: Vec::new(),
        default_durations: HashMap::new(),
        reminder_policy: None,
        escalation_policies: Vec::new(),
        is_template: false,
        is_active: true,
    }
}

// ---------------------------------------------------------------------------
// In-memory employee directory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryDirectory {
    managers: Mutex<HashMap<Uuid, Uuid>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_manager(&self, employee: Uuid, manager: Uuid) {
        self.managers.lock().unwrap().insert(employee, manager);
    }
}

impl EmployeeDirectory for InMemoryDirectory {
    async fn manager_of(&self, employee_id: &Uuid) -> Result<Option<Uuid>, RepositoryError> {
        Ok(self.managers.lock().unwrap().get(employee_id).copied())
    }
}

// ---------------------------------------------------------------------------
// In-memory definition repository
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryDefinitions {
    defs: Mutex<HashMap<Uuid, WorkflowDefinition>>,
    versions: Mutex<HashMap<(Uuid, i32), WorkflowDefinition>>,
}

impl InMemoryDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert without slug checks.
    pub fn insert(&self, def: WorkflowDefinition) {
        self.snapshot(&def);
        self.defs.lock().unwrap().insert(def.id, def);
    }

    fn snapshot(&self, def: &WorkflowDefinition) {
        self.versions
            .lock()
            .unwrap()
            .insert((def.id, def.version), def.clone());
    }
}

impl DefinitionRepository for InMemoryDefinitions {
    async fn create(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let mut defs = self.defs.lock().unwrap();
        if defs
            .values()
            .any(|d| d.tenant_id == def.tenant_id && d.slug == def.slug)
        {
            return Err(RepositoryError::Conflict(format!(
                "slug '{}' already exists",
                def.slug
            )));
        }
        defs.insert(def.id, def.clone());
        self.snapshot(def);
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.defs.lock().unwrap().get(id).cloned())
    }

    async fn get_by_slug(
        &self,
        tenant_id: Option<&Uuid>,
        slug: &str,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self
            .defs
            .lock()
            .unwrap()
            .values()
            .find(|d| d.tenant_id.as_ref() == tenant_id && d.slug == slug)
            .cloned())
    }

    async fn list(
        &self,
        tenant_id: &Uuid,
        filter: &DefinitionFilter,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut found: Vec<_> = self
            .defs
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.tenant_id.is_none_or(|t| t == *tenant_id))
            .filter(|d| !(filter.exclude_system && d.is_system))
            .filter(|d| filter.module.as_ref().is_none_or(|m| d.module.as_ref() == Some(m)))
            .filter(|d| filter.category.as_ref().is_none_or(|c| d.category.as_ref() == Some(c)))
            .filter(|d| filter.is_active.is_none_or(|a| d.is_active == a))
            .filter(|d| filter.is_template.is_none_or(|t| d.is_template == t))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn update(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let mut defs = self.defs.lock().unwrap();
        match defs.get_mut(&def.id) {
            Some(existing) => {
                *existing = def.clone();
                self.snapshot(def);
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn get_version(
        &self,
        id: &Uuid,
        version: i32,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.versions.lock().unwrap().get(&(*id, version)).cloned())
    }

    async fn upsert_global(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let mut defs = self.defs.lock().unwrap();
        defs.retain(|_, d| !(d.tenant_id.is_none() && d.slug == def.slug && d.id != def.id));
        defs.insert(def.id, def.clone());
        self.snapshot(def);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory instance repository
// ---------------------------------------------------------------------------

#[derive(Default)]
struct InstanceState {
    instances: HashMap<Uuid, WorkflowInstance>,
    steps: HashMap<Uuid, StepInstance>,
}

#[derive(Default)]
pub struct InMemoryInstances {
    state: Mutex<InstanceState>,
}

impl InMemoryInstances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_due_date(&self, step_id: &Uuid, due: DateTime<Utc>) {
        if let Some(step) = self.state.lock().unwrap().steps.get_mut(step_id) {
            step.due_date = Some(due);
        }
    }

    /// Overwrite the stored revision, simulating a writer elsewhere.
    pub fn bump_revision(&self, instance_id: &Uuid) {
        if let Some(instance) = self.state.lock().unwrap().instances.get_mut(instance_id) {
            instance.revision += 1;
        }
    }

    pub fn steps_of(&self, instance_id: &Uuid) -> Vec<StepInstance> {
        let state = self.state.lock().unwrap();
        let mut steps: Vec<_> = state
            .steps
            .values()
            .filter(|s| s.instance_id == *instance_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.step_order);
        steps
    }
}

impl InstanceState {
    fn tenant_of(&self, step: &StepInstance) -> Option<Uuid> {
        self.instances.get(&step.instance_id).map(|i| i.tenant_id)
    }
}

impl InstanceRepository for InMemoryInstances {
    async fn create_instance(
        &self,
        instance: &WorkflowInstance,
        steps: &[StepInstance],
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        if state.instances.contains_key(&instance.id) {
            return Err(RepositoryError::Conflict("instance exists".to_string()));
        }
        state.instances.insert(instance.id, instance.clone());
        for step in steps {
            state.steps.insert(step.id, step.clone());
        }
        Ok(())
    }

    async fn get_instance(&self, id: &Uuid) -> Result<Option<WorkflowInstance>, RepositoryError> {
        Ok(self.state.lock().unwrap().instances.get(id).cloned())
    }

    async fn list_instances(
        &self,
        tenant_id: &Uuid,
        filter: &InstanceFilter,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let mut found: Vec<_> = state
            .instances
            .values()
            .filter(|i| i.tenant_id == *tenant_id)
            .filter(|i| filter.status.is_none_or(|s| i.status == s))
            .filter(|i| filter.definition_id.is_none_or(|d| i.definition_id == d))
            .filter(|i| filter.subject_employee_id.is_none_or(|e| i.subject_employee_id == e))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.map_or(usize::MAX, |l| l.max(0) as usize);
        Ok(found.into_iter().skip(offset).take(limit).collect())
    }

    async fn commit(&self, change: &StateCommit) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .instances
            .get(&change.instance.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.revision != change.expected_revision {
            return Err(RepositoryError::Conflict(format!(
                "instance {} revision is {}, expected {}",
                stored.id, stored.revision, change.expected_revision
            )));
        }
        if change
            .updated_steps
            .iter()
            .any(|s| !state.steps.contains_key(&s.id))
        {
            return Err(RepositoryError::NotFound);
        }
        state
            .instances
            .insert(change.instance.id, change.instance.clone());
        for step in change.updated_steps.iter().chain(&change.inserted_steps) {
            state.steps.insert(step.id, step.clone());
        }
        Ok(())
    }

    async fn get_step(&self, id: &Uuid) -> Result<Option<StepInstance>, RepositoryError> {
        Ok(self.state.lock().unwrap().steps.get(id).cloned())
    }

    async fn list_steps(&self, instance_id: &Uuid) -> Result<Vec<StepInstance>, RepositoryError> {
        Ok(self.steps_of(instance_id))
    }

    async fn list_open_steps_for_assignee(
        &self,
        tenant_id: &Uuid,
        employee_id: &Uuid,
    ) -> Result<Vec<StepInstance>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let mut found: Vec<_> = state
            .steps
            .values()
            .filter(|s| s.is_open() && state.tenant_of(s) == Some(*tenant_id))
            .filter(|s| {
                s.assignee_employee_id == Some(*employee_id)
                    || s.branches.iter().any(|b| {
                        b.status.is_open() && b.assignee_employee_id == Some(*employee_id)
                    })
            })
            .cloned()
            .collect();
        found.sort_by_key(|s| (s.due_date.is_none(), s.due_date, s.step_order));
        Ok(found)
    }

    async fn list_due_steps(&self, before: DateTime<Utc>) -> Result<Vec<StepInstance>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let mut found: Vec<_> = state
            .steps
            .values()
            .filter(|s| s.is_overdue(before))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.due_date);
        Ok(found)
    }

    async fn count_instances(
        &self,
        tenant_id: &Uuid,
        statuses: &[InstanceStatus],
    ) -> Result<i64, RepositoryError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .instances
            .values()
            .filter(|i| i.tenant_id == *tenant_id && statuses.contains(&i.status))
            .count() as i64)
    }

    async fn count_overdue_steps(&self, tenant_id: &Uuid, now: DateTime<Utc>) -> Result<i64, RepositoryError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .steps
            .values()
            .filter(|s| s.is_overdue(now) && state.tenant_of(s) == Some(*tenant_id))
            .count() as i64)
    }

    async fn count_completed_since(
        &self,
        tenant_id: &Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, RepositoryError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .instances
            .values()
            .filter(|i| {
                i.tenant_id == *tenant_id
                    && i.status == InstanceStatus::Completed
                    && i.completed_at.is_some_and(|at| at >= since)
            })
            .count() as i64)
    }
}

// ---------------------------------------------------------------------------
// Test engine
// ---------------------------------------------------------------------------

pub type MemoryEngine = Engine<InMemoryDefinitions, InMemoryInstances, InMemoryDirectory>;

/// A fully wired engine over in-memory doubles, with one tenant, one subject
/// employee, and callers for both.
pub struct TestEngine {
    engine: MemoryEngine,
    pub definition_repo: Arc<InMemoryDefinitions>,
    pub instance_repo: Arc<InMemoryInstances>,
    pub directory: Arc<InMemoryDirectory>,
    pub tenant_id: Uuid,
    pub subject: Uuid,
    /// HR admin in the tenant.
    pub hr: AuthContext,
    /// The subject employee acting for themselves.
    pub employee: AuthContext,
}

impl Deref for TestEngine {
    type Target = MemoryEngine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        let definition_repo = Arc::new(InMemoryDefinitions::new());
        let instance_repo = Arc::new(InMemoryInstances::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let engine = Engine::new(
            definition_repo.clone(),
            instance_repo.clone(),
            directory.clone(),
            config,
        );
        let tenant_id = Uuid::now_v7();
        let subject = Uuid::now_v7();
        Self {
            engine,
            definition_repo,
            instance_repo,
            directory,
            tenant_id,
            subject,
            hr: AuthContext::new(tenant_id, Uuid::now_v7(), CallerRole::HrAdmin),
            employee: AuthContext::new(tenant_id, subject, CallerRole::Employee),
        }
    }

    /// Give the subject a manager and return the manager's id.
    pub fn subject_manager(&self) -> Uuid {
        let manager = Uuid::now_v7();
        self.directory.set_manager(self.subject, manager);
        manager
    }

    /// Caller context for another employee of the tenant.
    pub fn caller(&self, employee_id: Uuid, role: CallerRole) -> AuthContext {
        AuthContext::new(self.tenant_id, employee_id, role)
    }

    /// An unsaved definition owned by the test tenant.
    pub fn definition(&self, steps: Vec<StepDefinition>) -> WorkflowDefinition {
        let mut def = definition(steps);
        def.tenant_id = Some(self.tenant_id);
        def
    }

    /// A saved definition owned by the test tenant.
    pub async fn store_definition(&self, steps: Vec<StepDefinition>) -> WorkflowDefinition {
        let def = self.definition(steps);
        self.definition_repo.create(&def).await.unwrap();
        def
    }

    /// A new, not yet placed instance of `def` for the subject.
    pub fn blank_instance(&self, def: &WorkflowDefinition) -> WorkflowInstance {
        let now = Utc::now();
        WorkflowInstance {
            id: Uuid::now_v7(),
            tenant_id: self.tenant_id,
            definition_id: def.id,
            definition_version: def.version,
            reference_number: "WF-TEST".to_string(),
            subject_employee_id: self.subject,
            source_type: "test".to_string(),
            source_id: "1".to_string(),
            status: InstanceStatus::Pending,
            current_step_id: None,
            completed_step_ids: Vec::new(),
            context_data: json!({}),
            started_by: None,
            started_at: now,
            due_date: None,
            completed_at: None,
            updated_at: now,
            revision: 0,
        }
    }

    pub fn start_request(&self, def: &WorkflowDefinition) -> StartInstanceRequest {
        StartInstanceRequest {
            definition_id: def.id,
            subject_employee_id: self.subject,
            source_type: "test".to_string(),
            source_id: Uuid::now_v7().to_string(),
            due_date: None,
            context_data: None,
        }
    }

    pub async fn start(&self, def: &WorkflowDefinition) -> InstanceDetail {
        self.instances
            .start(&self.hr, self.start_request(def))
            .await
            .unwrap()
    }

    /// The single open step of an instance.
    pub fn open_step(&self, instance_id: &Uuid) -> StepInstance {
        let open: Vec<_> = self
            .instance_repo
            .steps_of(instance_id)
            .into_iter()
            .filter(|s| s.is_open())
            .collect();
        assert_eq!(open.len(), 1, "expected exactly one open step");
        open.into_iter().next().unwrap()
    }

    /// Complete the current (form-like) step as HR.
    pub async fn complete_current(&self, instance_id: &Uuid) -> WorkflowInstance {
        let step = self.open_step(instance_id);
        self.steps
            .complete(&self.hr, &step.id, None)
            .await
            .unwrap()
            .instance
    }

    /// Assert the structural invariants of an instance and its steps.
    pub fn assert_invariants(&self, instance_id: &Uuid) {
        let instance = self
            .instance_repo
            .state
            .lock()
            .unwrap()
            .instances
            .get(instance_id)
            .cloned()
            .unwrap();
        let steps = self.instance_repo.steps_of(instance_id);
        let open: Vec<_> = steps.iter().filter(|s| s.is_open()).collect();

        if instance.is_terminal() {
            assert!(open.is_empty(), "terminal instance has open steps");
            assert!(instance.current_step_id.is_none());
        } else {
            assert_eq!(open.len(), 1, "non-terminal instance must have one open step");
            assert_eq!(instance.current_step_id.as_deref(), Some(open[0].step_id.as_str()));
        }

        let mut seen = HashSet::new();
        assert!(
            instance.completed_step_ids.iter().all(|id| seen.insert(id.as_str())),
            "completed_step_ids has duplicates"
        );

        // Steps closed by the advancer. Cancel and expiry skip the open step
        // without recording it.
        let terminated = matches!(
            instance.status,
            InstanceStatus::Cancelled | InstanceStatus::Expired
        );
        let closed: Vec<_> = steps
            .iter()
            .filter(|s| match s.status {
                StepStatus::Completed => true,
                StepStatus::Skipped => !(terminated && s.completed_at == instance.completed_at),
                _ => false,
            })
            .collect();
        let closed_ids: HashSet<&str> = closed.iter().map(|s| s.step_id.as_str()).collect();
        if closed_ids.len() == closed.len() {
            assert_eq!(
                instance.completed_step_ids.len(),
                closed.len(),
                "every closed step is recorded once"
            );
        } else {
            // Re-entered steps are recorded once.
            assert_eq!(
                instance.completed_step_ids.len(),
                closed_ids.len(),
                "re-entered steps are recorded once"
            );
        }
        assert_eq!(seen, closed_ids, "completed_step_ids must match the closed steps");
        let mut orders: Vec<_> = steps.iter().map(|s| s.step_order).collect();
        orders.dedup();
        assert_eq!(orders.len(), steps.len(), "step orders must be unique");
    }
}

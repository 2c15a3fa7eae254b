//! Workflow instance repository trait.
//!
//! Covers instances and their step instances. All state-changing writes that
//! touch an existing instance go through [`InstanceRepository::commit`], which
//! applies a [`StateCommit`] atomically and only if the stored revision still
//! matches.

use chrono::{DateTime, Utc};
use hrflow_types::error::RepositoryError;
use hrflow_types::instance::{InstanceStatus, StepInstance, WorkflowInstance};
use uuid::Uuid;

/// Filter criteria for listing instances.
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub status: Option<InstanceStatus>,
    pub definition_id: Option<Uuid>,
    pub subject_employee_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// One atomic change to an instance and its steps.
///
/// Either every part is applied or none is. The commit is rejected with
/// `RepositoryError::Conflict` when the stored revision differs from
/// `expected_revision`; on success the stored revision becomes
/// `instance.revision`.
#[derive(Debug, Clone)]
pub struct StateCommit {
    /// New instance state (revision already bumped).
    pub instance: WorkflowInstance,
    pub expected_revision: i64,
    /// Existing step instances to overwrite.
    pub updated_steps: Vec<StepInstance>,
    /// New step instances to insert.
    pub inserted_steps: Vec<StepInstance>,
}

/// Repository trait for instance and step-instance persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait InstanceRepository: Send + Sync {
    /// Insert a new instance with its initial step instances in one
    /// transaction.
    fn create_instance(
        &self,
        instance: &WorkflowInstance,
        steps: &[StepInstance],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_instance(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowInstance>, RepositoryError>> + Send;

    /// List a tenant's instances, newest first.
    fn list_instances(
        &self,
        tenant_id: &Uuid,
        filter: &InstanceFilter,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    /// Apply a state commit atomically, guarded by the instance revision.
    fn commit(
        &self,
        change: &StateCommit,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_step(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<StepInstance>, RepositoryError>> + Send;

    /// All step instances of an instance, ordered by `step_order`.
    fn list_steps(
        &self,
        instance_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepInstance>, RepositoryError>> + Send;

    /// Open steps assigned to an employee within a tenant, earliest due first
    /// (undated last). Includes parallel steps with an open branch assigned
    /// to the employee.
    fn list_open_steps_for_assignee(
        &self,
        tenant_id: &Uuid,
        employee_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepInstance>, RepositoryError>> + Send;

    /// Open steps, across all tenants, whose due date is before `before`.
    /// Used by the external scheduler.
    fn list_due_steps(
        &self,
        before: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<StepInstance>, RepositoryError>> + Send;

    fn count_instances(
        &self,
        tenant_id: &Uuid,
        statuses: &[InstanceStatus],
    ) -> impl std::future::Future<Output = Result<i64, RepositoryError>> + Send;

    fn count_overdue_steps(
        &self,
        tenant_id: &Uuid,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<i64, RepositoryError>> + Send;

    /// Instances that reached `completed` at or after `since`.
    fn count_completed_since(
        &self,
        tenant_id: &Uuid,
        since: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<i64, RepositoryError>> + Send;
}

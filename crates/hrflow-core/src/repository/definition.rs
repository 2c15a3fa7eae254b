//! Workflow definition repository trait.

use hrflow_types::error::RepositoryError;
use hrflow_types::workflow::WorkflowDefinition;
use uuid::Uuid;

/// Filter criteria for listing definitions.
#[derive(Debug, Clone, Default)]
pub struct DefinitionFilter {
    pub module: Option<String>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
    pub is_template: Option<bool>,
    /// Leave out global system templates.
    pub exclude_system: bool,
}

/// Repository trait for workflow definition persistence.
///
/// A definition is either owned by a tenant or global (`tenant_id = None`).
/// Slugs are unique per scope.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait DefinitionRepository: Send + Sync {
    /// Insert a new definition. Fails with `Conflict` on a duplicate slug in
    /// the same scope.
    fn create(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a definition by id, regardless of scope.
    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// Get a definition by slug within exactly one scope (`None` = global).
    fn get_by_slug(
        &self,
        tenant_id: Option<&Uuid>,
        slug: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// List the tenant's definitions plus global ones, ordered by name.
    fn list(
        &self,
        tenant_id: &Uuid,
        filter: &DefinitionFilter,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// The definition exactly as it was at `version`. Every write records a
    /// snapshot of the version it carries.
    fn get_version(
        &self,
        id: &Uuid,
        version: i32,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// Replace an existing definition by id. Fails with `NotFound` if absent.
    fn update(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Insert or replace a global definition keyed by slug (system template
    /// seeding).
    fn upsert_global(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

//! Employee directory port.
//!
//! The engine's only view of the organization: who manages whom. The
//! directory itself is owned elsewhere and is read-only here.

use hrflow_types::error::RepositoryError;
use uuid::Uuid;

/// Read-only reporting-line lookups.
pub trait EmployeeDirectory: Send + Sync {
    /// Direct manager of `employee_id`. `Ok(None)` when the employee has no
    /// manager on file or is unknown to the directory.
    fn manager_of(
        &self,
        employee_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Uuid>, RepositoryError>> + Send;
}

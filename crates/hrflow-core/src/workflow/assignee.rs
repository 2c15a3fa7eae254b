//! Assignee resolution over the reporting hierarchy.

use std::sync::Arc;

use hrflow_types::error::RepositoryError;
use hrflow_types::workflow::AssigneeRole;
use uuid::Uuid;

use crate::repository::directory::EmployeeDirectory;

/// Upper bound on reporting-line hops a role may need.
pub const MAX_HIERARCHY_HOPS: usize = 2;

/// Maps an abstract [`AssigneeRole`] plus the subject employee to a concrete
/// employee.
///
/// `Ok(None)` means "unassigned" and is not an error: the step is created
/// without an assignee and can be claimed.
pub struct AssigneeResolver<D: EmployeeDirectory> {
    directory: Arc<D>,
}

impl<D: EmployeeDirectory> AssigneeResolver<D> {
    pub fn new(directory: Arc<D>) -> Self {
        Self { directory }
    }

    pub async fn resolve(
        &self,
        role: AssigneeRole,
        subject_employee_id: &Uuid,
    ) -> Result<Option<Uuid>, RepositoryError> {
        match role {
            AssigneeRole::Employee => Ok(Some(*subject_employee_id)),
            AssigneeRole::Manager => self.walk_up(subject_employee_id, 1).await,
            AssigneeRole::SkipLevelManager => self.walk_up(subject_employee_id, 2).await,
            // Pool-based roles are resolved outside the engine.
            AssigneeRole::HrManager
            | AssigneeRole::HrAdmin
            | AssigneeRole::Peer
            | AssigneeRole::Custom => Ok(None),
        }
    }

    /// Follow the manager chain `hops` levels up. Any missing link, or a
    /// link back to someone already on the chain, yields `None`.
    async fn walk_up(&self, from: &Uuid, hops: usize) -> Result<Option<Uuid>, RepositoryError> {
        let mut chain = vec![*from];
        let mut current = *from;
        for _ in 0..hops.min(MAX_HIERARCHY_HOPS) {
            match self.directory.manager_of(&current).await? {
                Some(manager) if !chain.contains(&manager) => {
                    chain.push(manager);
                    current = manager;
                }
                Some(manager) => {
                    tracing::warn!(
                        employee_id = %from,
                        %manager,
                        "reporting line loops back on itself"
                    );
                    return Ok(None);
                }
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

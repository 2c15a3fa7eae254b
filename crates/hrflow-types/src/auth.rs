//! Caller authorization context.
//!
//! The engine never authenticates anyone itself. The fronting layer supplies
//! an [`AuthContext`] (tenant, caller identity, caller role) with every
//! operation, and the engine uses it for tenant scoping and ownership checks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Role of the calling user within their tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerRole {
    Employee,
    Manager,
    HrManager,
    HrAdmin,
    TenantAdmin,
    SystemAdmin,
}

impl CallerRole {
    /// HR-privileged roles bypass step ownership checks and may author
    /// definitions and cancel instances.
    pub fn is_hr_privileged(&self) -> bool {
        matches!(
            self,
            CallerRole::HrManager
                | CallerRole::HrAdmin
                | CallerRole::TenantAdmin
                | CallerRole::SystemAdmin
        )
    }
}

impl fmt::Display for CallerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallerRole::Employee => "employee",
            CallerRole::Manager => "manager",
            CallerRole::HrManager => "hr_manager",
            CallerRole::HrAdmin => "hr_admin",
            CallerRole::TenantAdmin => "tenant_admin",
            CallerRole::SystemAdmin => "system_admin",
        };
        write!(f, "{s}")
    }
}

impl FromStr for CallerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "employee" => Ok(CallerRole::Employee),
            "manager" => Ok(CallerRole::Manager),
            "hr_manager" => Ok(CallerRole::HrManager),
            "hr_admin" => Ok(CallerRole::HrAdmin),
            "tenant_admin" => Ok(CallerRole::TenantAdmin),
            "system_admin" => Ok(CallerRole::SystemAdmin),
            other => Err(format!("invalid caller role: '{other}'")),
        }
    }
}

/// Who is calling, on behalf of which tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub tenant_id: Uuid,
    /// The caller's own employee id.
    pub employee_id: Uuid,
    pub role: CallerRole,
}

impl AuthContext {
    pub fn new(tenant_id: Uuid, employee_id: Uuid, role: CallerRole) -> Self {
        Self {
            tenant_id,
            employee_id,
            role,
        }
    }

    pub fn is_hr_privileged(&self) -> bool {
        self.role.is_hr_privileged()
    }

    /// Fail with `Forbidden` unless the caller holds an HR-privileged role.
    pub fn require_hr(&self, action: &str) -> Result<(), EngineError> {
        if self.is_hr_privileged() {
            Ok(())
        } else {
            Err(EngineError::forbidden(format!(
                "role '{}' may not {action}",
                self.role
            )))
        }
    }
}

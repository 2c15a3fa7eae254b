//! Query parameter extractors for list endpoints.

use serde::Deserialize;
use uuid::Uuid;

use hrflow_core::repository::definition::DefinitionFilter;
use hrflow_core::repository::instance::InstanceFilter;
use hrflow_types::instance::InstanceStatus;

use crate::http::error::AppError;

/// Query parameters for the definition list endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct DefinitionListQuery {
    pub module: Option<String>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
    pub is_template: Option<bool>,
    /// Hide global system templates.
    #[serde(default)]
    pub exclude_system: bool,
}

impl From<DefinitionListQuery> for DefinitionFilter {
    fn from(q: DefinitionListQuery) -> Self {
        DefinitionFilter {
            module: q.module,
            category: q.category,
            is_active: q.is_active,
            is_template: q.is_template,
            exclude_system: q.exclude_system,
        }
    }
}

/// Query parameters for the instance list endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct InstanceListQuery {
    /// Filter by status (pending, in_progress, ..., blocked).
    pub status: Option<String>,
    pub definition_id: Option<Uuid>,
    pub subject_employee_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TryFrom<InstanceListQuery> for InstanceFilter {
    type Error = AppError;

    fn try_from(q: InstanceListQuery) -> Result<Self, Self::Error> {
        let status = q
            .status
            .as_deref()
            .map(str::parse::<InstanceStatus>)
            .transpose()
            .map_err(AppError::Validation)?;
        Ok(InstanceFilter {
            status,
            definition_id: q.definition_id,
            subject_employee_id: q.subject_employee_id,
            limit: q.limit,
            offset: q.offset,
        })
    }
}

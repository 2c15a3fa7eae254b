//! Dashboard aggregates for the caller's tenant.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use hrflow_types::auth::AuthContext;
use hrflow_types::error::EngineError;
use hrflow_types::instance::{DashboardSummary, InstanceStatus};

use crate::repository::instance::InstanceRepository;

pub struct DashboardService<IR: InstanceRepository> {
    instances: Arc<IR>,
}

impl<IR: InstanceRepository> DashboardService<IR> {
    pub fn new(instances: Arc<IR>) -> Self {
        Self { instances }
    }

    pub async fn summary(&self, auth: &AuthContext) -> Result<DashboardSummary, EngineError> {
        self.summary_at(auth, Utc::now()).await
    }

    /// Aggregates as of `now`.
    pub async fn summary_at(
        &self,
        auth: &AuthContext,
        now: DateTime<Utc>,
    ) -> Result<DashboardSummary, EngineError> {
        let tenant = &auth.tenant_id;
        let pending_steps = self
            .instances
            .list_open_steps_for_assignee(tenant, &auth.employee_id)
            .await?;
        let active_instance_count = self
            .instances
            .count_instances(tenant, &InstanceStatus::ACTIVE)
            .await?;
        let overdue_step_count = self.instances.count_overdue_steps(tenant, now).await?;
        let completed_this_month = self
            .instances
            .count_completed_since(tenant, start_of_month(now))
            .await?;

        Ok(DashboardSummary {
            pending_steps,
            active_instance_count,
            overdue_step_count,
            completed_this_month,
        })
    }
}

/// Midnight UTC on the first day of `now`'s month.
fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(now)
}

//! SQLite instance repository implementation.
//!
//! Implements `InstanceRepository` from `hrflow-core`. A [`StateCommit`] is
//! applied inside one writer transaction: the instance row is updated only
//! when its stored revision still matches, then the closed step is rewritten
//! and new steps are inserted. Any failure rolls the whole commit back.

use chrono::{DateTime, Utc};
use hrflow_core::repository::instance::{InstanceFilter, InstanceRepository, StateCommit};
use hrflow_types::error::RepositoryError;
use hrflow_types::instance::{InstanceStatus, StepInstance, WorkflowInstance};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{
    format_datetime, from_json, parse_datetime, parse_enum, parse_opt_datetime, parse_opt_uuid,
    parse_uuid, query_error, to_json,
};

/// SQLite-backed implementation of `InstanceRepository`.
pub struct SqliteInstanceRepository {
    pool: DatabasePool,
}

impl SqliteInstanceRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct InstanceRow {
    id: String,
    tenant_id: String,
    definition_id: String,
    definition_version: i32,
    reference_number: String,
    subject_employee_id: String,
    source_type: String,
    source_id: String,
    status: String,
    current_step_id: Option<String>,
    completed_step_ids: String,
    context_data: String,
    started_by: Option<String>,
    started_at: String,
    due_date: Option<String>,
    completed_at: Option<String>,
    updated_at: String,
    revision: i64,
}

impl InstanceRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            definition_id: row.try_get("definition_id")?,
            definition_version: row.try_get("definition_version")?,
            reference_number: row.try_get("reference_number")?,
            subject_employee_id: row.try_get("subject_employee_id")?,
            source_type: row.try_get("source_type")?,
            source_id: row.try_get("source_id")?,
            status: row.try_get("status")?,
            current_step_id: row.try_get("current_step_id")?,
            completed_step_ids: row.try_get("completed_step_ids")?,
            context_data: row.try_get("context_data")?,
            started_by: row.try_get("started_by")?,
            started_at: row.try_get("started_at")?,
            due_date: row.try_get("due_date")?,
            completed_at: row.try_get("completed_at")?,
            updated_at: row.try_get("updated_at")?,
            revision: row.try_get("revision")?,
        })
    }

    fn into_instance(self) -> Result<WorkflowInstance, RepositoryError> {
        Ok(WorkflowInstance {
            id: parse_uuid(&self.id)?,
            tenant_id: parse_uuid(&self.tenant_id)?,
            definition_id: parse_uuid(&self.definition_id)?,
            definition_version: self.definition_version,
            reference_number: self.reference_number,
            subject_employee_id: parse_uuid(&self.subject_employee_id)?,
            source_type: self.source_type,
            source_id: self.source_id,
            status: parse_enum(&self.status)?,
            current_step_id: self.current_step_id,
            completed_step_ids: from_json("completed_step_ids", &self.completed_step_ids)?,
            context_data: from_json("context_data", &self.context_data)?,
            started_by: parse_opt_uuid(self.started_by.as_deref())?,
            started_at: parse_datetime(&self.started_at)?,
            due_date: parse_opt_datetime(self.due_date.as_deref())?,
            completed_at: parse_opt_datetime(self.completed_at.as_deref())?,
            updated_at: parse_datetime(&self.updated_at)?,
            revision: self.revision,
        })
    }
}

struct StepRow {
    id: String,
    instance_id: String,
    step_id: String,
    step_name: String,
    step_type: String,
    step_order: i32,
    assignee_role: String,
    assignee_employee_id: Option<String>,
    status: String,
    approval_status: Option<String>,
    payload: Option<String>,
    branches: String,
    due_date: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    completed_by: Option<String>,
    approver_employee_id: Option<String>,
    approved_at: Option<String>,
    approver_comment: Option<String>,
    skip_reason: Option<String>,
    created_at: String,
}

impl StepRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            instance_id: row.try_get("instance_id")?,
            step_id: row.try_get("step_id")?,
            step_name: row.try_get("step_name")?,
            step_type: row.try_get("step_type")?,
            step_order: row.try_get("step_order")?,
            assignee_role: row.try_get("assignee_role")?,
            assignee_employee_id: row.try_get("assignee_employee_id")?,
            status: row.try_get("status")?,
            approval_status: row.try_get("approval_status")?,
            payload: row.try_get("payload")?,
            branches: row.try_get("branches")?,
            due_date: row.try_get("due_date")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            completed_by: row.try_get("completed_by")?,
            approver_employee_id: row.try_get("approver_employee_id")?,
            approved_at: row.try_get("approved_at")?,
            approver_comment: row.try_get("approver_comment")?,
            skip_reason: row.try_get("skip_reason")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_step(self) -> Result<StepInstance, RepositoryError> {
        Ok(StepInstance {
            id: parse_uuid(&self.id)?,
            instance_id: parse_uuid(&self.instance_id)?,
            step_id: self.step_id,
            step_name: self.step_name,
            step_type: parse_enum(&self.step_type)?,
            step_order: self.step_order,
            assignee_role: parse_enum(&self.assignee_role)?,
            assignee_employee_id: parse_opt_uuid(self.assignee_employee_id.as_deref())?,
            status: parse_enum(&self.status)?,
            approval_status: self.approval_status.as_deref().map(parse_enum).transpose()?,
            payload: self
                .payload
                .as_deref()
                .map(|s| from_json("payload", s))
                .transpose()?,
            branches: from_json("branches", &self.branches)?,
            due_date: parse_opt_datetime(self.due_date.as_deref())?,
            started_at: parse_opt_datetime(self.started_at.as_deref())?,
            completed_at: parse_opt_datetime(self.completed_at.as_deref())?,
            completed_by: parse_opt_uuid(self.completed_by.as_deref())?,
            approver_employee_id: parse_opt_uuid(self.approver_employee_id.as_deref())?,
            approved_at: parse_opt_datetime(self.approved_at.as_deref())?,
            approver_comment: self.approver_comment,
            skip_reason: self.skip_reason,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

fn rows_into_instances(rows: &[SqliteRow]) -> Result<Vec<WorkflowInstance>, RepositoryError> {
    let mut instances = Vec::with_capacity(rows.len());
    for row in rows {
        let r = InstanceRow::from_row(row).map_err(query_error)?;
        instances.push(r.into_instance()?);
    }
    Ok(instances)
}

fn rows_into_steps(rows: &[SqliteRow]) -> Result<Vec<StepInstance>, RepositoryError> {
    let mut steps = Vec::with_capacity(rows.len());
    for row in rows {
        let r = StepRow::from_row(row).map_err(query_error)?;
        steps.push(r.into_step()?);
    }
    Ok(steps)
}

fn opt_uuid(id: Option<Uuid>) -> Option<String> {
    id.map(|u| u.to_string())
}

fn opt_datetime(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(format_datetime)
}

const OPEN_STATUSES: &str = "('pending', 'in_progress')";

// ---------------------------------------------------------------------------
// Statement helpers (run on the writer connection or inside a transaction)
// ---------------------------------------------------------------------------

async fn insert_step(conn: &mut SqliteConnection, step: &StepInstance) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        r#"INSERT INTO step_instances
           (id, instance_id, step_id, step_name, step_type, step_order, assignee_role,
            assignee_employee_id, status, approval_status, payload, branches, due_date,
            started_at, completed_at, completed_by, approver_employee_id, approved_at,
            approver_comment, skip_reason, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(step.id.to_string())
    .bind(step.instance_id.to_string())
    .bind(&step.step_id)
    .bind(&step.step_name)
    .bind(step.step_type.to_string())
    .bind(step.step_order)
    .bind(step.assignee_role.to_string())
    .bind(opt_uuid(step.assignee_employee_id))
    .bind(step.status.to_string())
    .bind(step.approval_status.map(|a| a.to_string()))
    .bind(step.payload.as_ref().map(to_json).transpose()?)
    .bind(to_json(&step.branches)?)
    .bind(opt_datetime(step.due_date))
    .bind(opt_datetime(step.started_at))
    .bind(opt_datetime(step.completed_at))
    .bind(opt_uuid(step.completed_by))
    .bind(opt_uuid(step.approver_employee_id))
    .bind(opt_datetime(step.approved_at))
    .bind(&step.approver_comment)
    .bind(&step.skip_reason)
    .bind(format_datetime(&step.created_at))
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE") => {
            Err(RepositoryError::Conflict(format!(
                "step order {} already used in instance {}",
                step.step_order, step.instance_id
            )))
        }
        Err(e) => Err(query_error(e)),
    }
}

async fn update_step(conn: &mut SqliteConnection, step: &StepInstance) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE step_instances SET assignee_employee_id = ?, status = ?, approval_status = ?, payload = ?, branches = ?, due_date = ?, started_at = ?, completed_at = ?, completed_by = ?, approver_employee_id = ?, approved_at = ?, approver_comment = ?, skip_reason = ?
         WHERE id = ? AND instance_id = ?",
    )
    .bind(opt_uuid(step.assignee_employee_id))
    .bind(step.status.to_string())
    .bind(step.approval_status.map(|a| a.to_string()))
    .bind(step.payload.as_ref().map(to_json).transpose()?)
    .bind(to_json(&step.branches)?)
    .bind(opt_datetime(step.due_date))
    .bind(opt_datetime(step.started_at))
    .bind(opt_datetime(step.completed_at))
    .bind(opt_uuid(step.completed_by))
    .bind(opt_uuid(step.approver_employee_id))
    .bind(opt_datetime(step.approved_at))
    .bind(&step.approver_comment)
    .bind(&step.skip_reason)
    .bind(step.id.to_string())
    .bind(step.instance_id.to_string())
    .execute(&mut *conn)
    .await
    .map_err(query_error)?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// InstanceRepository impl
// ---------------------------------------------------------------------------

impl InstanceRepository for SqliteInstanceRepository {
    async fn create_instance(
        &self,
        instance: &WorkflowInstance,
        steps: &[StepInstance],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let result = sqlx::query(
            r#"INSERT INTO workflow_instances
               (id, tenant_id, definition_id, definition_version, reference_number,
                subject_employee_id, source_type, source_id, status, current_step_id,
                completed_step_ids, context_data, started_by, started_at, due_date,
                completed_at, updated_at, revision)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(instance.id.to_string())
        .bind(instance.tenant_id.to_string())
        .bind(instance.definition_id.to_string())
        .bind(instance.definition_version)
        .bind(&instance.reference_number)
        .bind(instance.subject_employee_id.to_string())
        .bind(&instance.source_type)
        .bind(&instance.source_id)
        .bind(instance.status.to_string())
        .bind(&instance.current_step_id)
        .bind(to_json(&instance.completed_step_ids)?)
        .bind(to_json(&instance.context_data)?)
        .bind(opt_uuid(instance.started_by))
        .bind(format_datetime(&instance.started_at))
        .bind(opt_datetime(instance.due_date))
        .bind(opt_datetime(instance.completed_at))
        .bind(format_datetime(&instance.updated_at))
        .bind(instance.revision)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE") => {
                return Err(RepositoryError::Conflict(format!(
                    "instance {} already exists",
                    instance.id
                )));
            }
            Err(e) => return Err(query_error(e)),
        }

        for step in steps {
            insert_step(&mut *tx, step).await?;
        }

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn get_instance(&self, id: &Uuid) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_instances WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let r = InstanceRow::from_row(&row).map_err(query_error)?;
                Ok(Some(r.into_instance()?))
            }
            None => Ok(None),
        }
    }

    async fn list_instances(
        &self,
        tenant_id: &Uuid,
        filter: &InstanceFilter,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let mut sql = String::from("SELECT * FROM workflow_instances WHERE tenant_id = ?");
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.definition_id.is_some() {
            sql.push_str(" AND definition_id = ?");
        }
        if filter.subject_employee_id.is_some() {
            sql.push_str(" AND subject_employee_id = ?");
        }
        sql.push_str(" ORDER BY started_at DESC, id DESC");

        // Pagination; LIMIT -1 is "no limit" in SQLite and OFFSET needs a LIMIT.
        if filter.limit.is_some() || filter.offset.is_some() {
            let limit = filter.limit.unwrap_or(-1);
            let offset = filter.offset.unwrap_or(0).max(0);
            sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
        }

        let mut query = sqlx::query(&sql).bind(tenant_id.to_string());
        if let Some(status) = filter.status {
            query = query.bind(status.to_string());
        }
        if let Some(definition_id) = filter.definition_id {
            query = query.bind(definition_id.to_string());
        }
        if let Some(subject) = filter.subject_employee_id {
            query = query.bind(subject.to_string());
        }

        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;
        rows_into_instances(&rows)
    }

    async fn commit(&self, change: &StateCommit) -> Result<(), RepositoryError> {
        let instance = &change.instance;
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let result = sqlx::query(
            "UPDATE workflow_instances SET status = ?, current_step_id = ?, completed_step_ids = ?, context_data = ?, due_date = ?, completed_at = ?, updated_at = ?, revision = ?
             WHERE id = ? AND revision = ?",
        )
        .bind(instance.status.to_string())
        .bind(&instance.current_step_id)
        .bind(to_json(&instance.completed_step_ids)?)
        .bind(to_json(&instance.context_data)?)
        .bind(opt_datetime(instance.due_date))
        .bind(opt_datetime(instance.completed_at))
        .bind(format_datetime(&instance.updated_at))
        .bind(instance.revision)
        .bind(instance.id.to_string())
        .bind(change.expected_revision)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            let stored: Option<(i64,)> =
                sqlx::query_as("SELECT revision FROM workflow_instances WHERE id = ?")
                    .bind(instance.id.to_string())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(query_error)?;
            return Err(match stored {
                None => RepositoryError::NotFound,
                Some((revision,)) => RepositoryError::Conflict(format!(
                    "instance {} revision is {revision}, expected {}",
                    instance.id, change.expected_revision
                )),
            });
        }

        for step in &change.updated_steps {
            update_step(&mut *tx, step).await?;
        }
        for step in &change.inserted_steps {
            insert_step(&mut *tx, step).await?;
        }

        tx.commit().await.map_err(query_error)?;
        tracing::debug!(
            instance_id = %instance.id,
            revision = instance.revision,
            updated = change.updated_steps.len(),
            inserted = change.inserted_steps.len(),
            "instance state committed"
        );
        Ok(())
    }

    async fn get_step(&self, id: &Uuid) -> Result<Option<StepInstance>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM step_instances WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let r = StepRow::from_row(&row).map_err(query_error)?;
                Ok(Some(r.into_step()?))
            }
            None => Ok(None),
        }
    }

    async fn list_steps(&self, instance_id: &Uuid) -> Result<Vec<StepInstance>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM step_instances WHERE instance_id = ? ORDER BY step_order ASC")
            .bind(instance_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;
        rows_into_steps(&rows)
    }

    async fn list_open_steps_for_assignee(
        &self,
        tenant_id: &Uuid,
        employee_id: &Uuid,
    ) -> Result<Vec<StepInstance>, RepositoryError> {
        let sql = format!(
            r#"SELECT s.* FROM step_instances s
               JOIN workflow_instances i ON i.id = s.instance_id
               WHERE i.tenant_id = ?
                 AND s.status IN {OPEN_STATUSES}
                 AND (s.assignee_employee_id = ?
                      OR EXISTS (SELECT 1 FROM json_each(s.branches) b
                                 WHERE json_extract(b.value, '$.assignee_employee_id') = ?
                                   AND json_extract(b.value, '$.status') IN {OPEN_STATUSES}))
               ORDER BY s.due_date IS NULL, s.due_date ASC, s.step_order ASC"#
        );
        let employee = employee_id.to_string();
        let rows = sqlx::query(&sql)
            .bind(tenant_id.to_string())
            .bind(&employee)
            .bind(&employee)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;
        rows_into_steps(&rows)
    }

    async fn list_due_steps(&self, before: DateTime<Utc>) -> Result<Vec<StepInstance>, RepositoryError> {
        let sql = format!(
            "SELECT * FROM step_instances WHERE status IN {OPEN_STATUSES} AND due_date IS NOT NULL AND due_date < ? ORDER BY due_date ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(format_datetime(&before))
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;
        rows_into_steps(&rows)
    }

    async fn count_instances(
        &self,
        tenant_id: &Uuid,
        statuses: &[InstanceStatus],
    ) -> Result<i64, RepositoryError> {
        if statuses.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT COUNT(*) FROM workflow_instances WHERE tenant_id = ? AND status IN ({placeholders})"
        );
        let mut query = sqlx::query_as::<_, (i64,)>(&sql).bind(tenant_id.to_string());
        for status in statuses {
            query = query.bind(status.to_string());
        }
        let (count,) = query
            .fetch_one(&self.pool.reader)
            .await
            .map_err(query_error)?;
        Ok(count)
    }

    async fn count_overdue_steps(&self, tenant_id: &Uuid, now: DateTime<Utc>) -> Result<i64, RepositoryError> {
        let sql = format!(
            r#"SELECT COUNT(*) FROM step_instances s
               JOIN workflow_instances i ON i.id = s.instance_id
               WHERE i.tenant_id = ? AND s.status IN {OPEN_STATUSES}
                 AND s.due_date IS NOT NULL AND s.due_date < ?"#
        );
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(tenant_id.to_string())
            .bind(format_datetime(&now))
            .fetch_one(&self.pool.reader)
            .await
            .map_err(query_error)?;
        Ok(count)
    }

    async fn count_completed_since(
        &self,
        tenant_id: &Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM workflow_instances WHERE tenant_id = ? AND status = ? AND completed_at >= ?",
        )
        .bind(tenant_id.to_string())
        .bind(InstanceStatus::Completed.to_string())
        .bind(format_datetime(&since))
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_error)?;
        Ok(count)
    }
}

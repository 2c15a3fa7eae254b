//! SQLite employee directory.
//!
//! A local mirror of the organization's reporting lines. The engine reads it
//! through `EmployeeDirectory`; `upsert` keeps it in sync with the HR system.

use chrono::Utc;
use hrflow_core::repository::directory::EmployeeDirectory;
use hrflow_types::employee::Employee;
use hrflow_types::error::RepositoryError;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_opt_uuid, parse_uuid, query_error};

pub struct SqliteEmployeeDirectory {
    pool: DatabasePool,
}

impl SqliteEmployeeDirectory {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Insert or replace one employee record.
    pub async fn upsert(&self, employee: &Employee) -> Result<(), RepositoryError> {
        let now = format_datetime(&Utc::now());
        sqlx::query(
            r#"INSERT INTO employees (id, tenant_id, display_name, manager_id, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 tenant_id = excluded.tenant_id,
                 display_name = excluded.display_name,
                 manager_id = excluded.manager_id,
                 updated_at = excluded.updated_at"#,
        )
        .bind(employee.id.to_string())
        .bind(employee.tenant_id.to_string())
        .bind(&employee.display_name)
        .bind(employee.manager_id.map(|m| m.to_string()))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<Employee>, RepositoryError> {
        let row = sqlx::query("SELECT id, tenant_id, display_name, manager_id FROM employees WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;
        row.as_ref().map(employee_from_row).transpose()
    }
}

fn employee_from_row(row: &SqliteRow) -> Result<Employee, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_error)?;
    let tenant_id: String = row.try_get("tenant_id").map_err(query_error)?;
    let manager_id: Option<String> = row.try_get("manager_id").map_err(query_error)?;
    Ok(Employee {
        id: parse_uuid(&id)?,
        tenant_id: parse_uuid(&tenant_id)?,
        manager_id: parse_opt_uuid(manager_id.as_deref())?,
        display_name: row.try_get("display_name").map_err(query_error)?,
    })
}

impl EmployeeDirectory for SqliteEmployeeDirectory {
    async fn manager_of(&self, employee_id: &Uuid) -> Result<Option<Uuid>, RepositoryError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT manager_id FROM employees WHERE id = ?")
                .bind(employee_id.to_string())
                .fetch_optional(&self.pool.reader)
                .await
                .map_err(query_error)?;
        match row {
            Some((manager_id,)) => parse_opt_uuid(manager_id.as_deref()),
            None => Ok(None),
        }
    }
}

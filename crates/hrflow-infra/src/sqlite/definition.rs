//! SQLite workflow definition repository implementation.
//!
//! Implements `DefinitionRepository` from `hrflow-core`. Scalar attributes get
//! their own columns for filtering; the step graph, transitions and policies
//! are stored as JSON text.

use hrflow_core::repository::definition::{DefinitionFilter, DefinitionRepository};
use hrflow_types::error::RepositoryError;
use hrflow_types::workflow::WorkflowDefinition;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{
    format_datetime, from_json, parse_datetime, parse_opt_uuid, parse_uuid, query_error, to_json,
};

/// SQLite-backed implementation of `DefinitionRepository`.
pub struct SqliteDefinitionRepository {
    pool: DatabasePool,
}

impl SqliteDefinitionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

const INSERT_SQL: &str = r#"INSERT INTO workflow_definitions
    (id, tenant_id, name, slug, description, module, category, tags, steps, transitions,
     default_durations, reminder_policy, escalation_policies, version, is_template,
     is_active, is_system, created_by, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#;

/// Snapshot rows are keyed by (id, version). Non-structural edits keep the
/// version, so the snapshot body is refreshed in place.
const SNAPSHOT_SQL: &str = r#"INSERT INTO workflow_definition_versions
    (definition_id, version, body, created_at)
    VALUES (?, ?, ?, ?)
    ON CONFLICT(definition_id, version) DO UPDATE SET body = excluded.body"#;

async fn write_snapshot(conn: &mut SqliteConnection, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
    sqlx::query(SNAPSHOT_SQL)
        .bind(def.id.to_string())
        .bind(def.version)
        .bind(to_json(def)?)
        .bind(format_datetime(&def.updated_at))
        .execute(conn)
        .await
        .map_err(query_error)?;
    Ok(())
}

const ON_CONFLICT_UPDATE: &str = r#"ON CONFLICT(id) DO UPDATE SET
      name = excluded.name,
      slug = excluded.slug,
      description = excluded.description,
      module = excluded.module,
      category = excluded.category,
      tags = excluded.tags,
      steps = excluded.steps,
      transitions = excluded.transitions,
      default_durations = excluded.default_durations,
      reminder_policy = excluded.reminder_policy,
      escalation_policies = excluded.escalation_policies,
      version = excluded.version,
      is_template = excluded.is_template,
      is_active = excluded.is_active,
      is_system = excluded.is_system,
      updated_at = excluded.updated_at"#;

/// Internal row type for mapping SQLite rows to a domain definition.
struct DefinitionRow {
    id: String,
    tenant_id: Option<String>,
    name: String,
    slug: String,
    description: Option<String>,
    module: Option<String>,
    category: Option<String>,
    tags: String,
    steps: String,
    transitions: String,
    default_durations: String,
    reminder_policy: Option<String>,
    escalation_policies: String,
    version: i32,
    is_template: bool,
    is_active: bool,
    is_system: bool,
    created_by: Option<String>,
    created_at: String,
    updated_at: String,
}

impl DefinitionRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            description: row.try_get("description")?,
            module: row.try_get("module")?,
            category: row.try_get("category")?,
            tags: row.try_get("tags")?,
            steps: row.try_get("steps")?,
            transitions: row.try_get("transitions")?,
            default_durations: row.try_get("default_durations")?,
            reminder_policy: row.try_get("reminder_policy")?,
            escalation_policies: row.try_get("escalation_policies")?,
            version: row.try_get("version")?,
            is_template: row.try_get("is_template")?,
            is_active: row.try_get("is_active")?,
            is_system: row.try_get("is_system")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_definition(self) -> Result<WorkflowDefinition, RepositoryError> {
        Ok(WorkflowDefinition {
            id: parse_uuid(&self.id)?,
            tenant_id: parse_opt_uuid(self.tenant_id.as_deref())?,
            name: self.name,
            slug: self.slug,
            description: self.description,
            module: self.module,
            category: self.category,
            tags: from_json("tags", &self.tags)?,
            steps: from_json("steps", &self.steps)?,
            transitions: from_json("transitions", &self.transitions)?,
            default_durations: from_json("default_durations", &self.default_durations)?,
            reminder_policy: self
                .reminder_policy
                .as_deref()
                .map(|s| from_json("reminder_policy", s))
                .transpose()?,
            escalation_policies: from_json("escalation_policies", &self.escalation_policies)?,
            version: self.version,
            is_template: self.is_template,
            is_active: self.is_active,
            is_system: self.is_system,
            created_by: parse_opt_uuid(self.created_by.as_deref())?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

fn rows_into_definitions(rows: &[SqliteRow]) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
    let mut defs = Vec::with_capacity(rows.len());
    for row in rows {
        let r = DefinitionRow::from_row(row).map_err(query_error)?;
        defs.push(r.into_definition()?);
    }
    Ok(defs)
}

impl SqliteDefinitionRepository {
    /// Insert `def`, or with `upsert` replace the row with the same id.
    async fn write(&self, def: &WorkflowDefinition, upsert: bool) -> Result<(), RepositoryError> {
        let sql = if upsert {
            format!("{INSERT_SQL} {ON_CONFLICT_UPDATE}")
        } else {
            INSERT_SQL.to_string()
        };
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;
        let result = sqlx::query(&sql)
            .bind(def.id.to_string())
            .bind(def.tenant_id.map(|t| t.to_string()))
            .bind(&def.name)
            .bind(&def.slug)
            .bind(&def.description)
            .bind(&def.module)
            .bind(&def.category)
            .bind(to_json(&def.tags)?)
            .bind(to_json(&def.steps)?)
            .bind(to_json(&def.transitions)?)
            .bind(to_json(&def.default_durations)?)
            .bind(def.reminder_policy.as_ref().map(to_json).transpose()?)
            .bind(to_json(&def.escalation_policies)?)
            .bind(def.version)
            .bind(def.is_template)
            .bind(def.is_active)
            .bind(def.is_system)
            .bind(def.created_by.map(|u| u.to_string()))
            .bind(format_datetime(&def.created_at))
            .bind(format_datetime(&def.updated_at))
            .execute(&mut *tx)
            .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE") => {
                return Err(RepositoryError::Conflict(format!(
                    "slug '{}' already exists",
                    def.slug
                )));
            }
            Err(e) => return Err(query_error(e)),
        }
        write_snapshot(&mut *tx, def).await?;
        tx.commit().await.map_err(query_error)?;
        Ok(())
    }
}

impl DefinitionRepository for SqliteDefinitionRepository {
    async fn create(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        self.write(def, false).await
    }

    async fn get(&self, id: &Uuid) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_definitions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let r = DefinitionRow::from_row(&row).map_err(query_error)?;
                Ok(Some(r.into_definition()?))
            }
            None => Ok(None),
        }
    }

    async fn get_by_slug(
        &self,
        tenant_id: Option<&Uuid>,
        slug: &str,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM workflow_definitions WHERE COALESCE(tenant_id, '') = ? AND slug = ?",
        )
        .bind(tenant_id.map(|t| t.to_string()).unwrap_or_default())
        .bind(slug)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => {
                let r = DefinitionRow::from_row(&row).map_err(query_error)?;
                Ok(Some(r.into_definition()?))
            }
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        tenant_id: &Uuid,
        filter: &DefinitionFilter,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut sql =
            String::from("SELECT * FROM workflow_definitions WHERE (tenant_id = ? OR tenant_id IS NULL)");
        if filter.module.is_some() {
            sql.push_str(" AND module = ?");
        }
        if filter.category.is_some() {
            sql.push_str(" AND category = ?");
        }
        if filter.is_active.is_some() {
            sql.push_str(" AND is_active = ?");
        }
        if filter.is_template.is_some() {
            sql.push_str(" AND is_template = ?");
        }
        if filter.exclude_system {
            sql.push_str(" AND is_system = 0");
        }
        sql.push_str(" ORDER BY name ASC, id ASC");

        let mut query = sqlx::query(&sql).bind(tenant_id.to_string());
        if let Some(module) = &filter.module {
            query = query.bind(module);
        }
        if let Some(category) = &filter.category {
            query = query.bind(category);
        }
        if let Some(active) = filter.is_active {
            query = query.bind(active);
        }
        if let Some(template) = filter.is_template {
            query = query.bind(template);
        }

        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;
        rows_into_definitions(&rows)
    }

    async fn get_version(
        &self,
        id: &Uuid,
        version: i32,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let body: Option<(String,)> = sqlx::query_as(
            "SELECT body FROM workflow_definition_versions WHERE definition_id = ? AND version = ?",
        )
        .bind(id.to_string())
        .bind(version)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        body.map(|(b,)| from_json("definition snapshot", &b)).transpose()
    }

    async fn update(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;
        let result = sqlx::query(
            "UPDATE workflow_definitions SET name = ?, description = ?, module = ?, category = ?, tags = ?, steps = ?, transitions = ?, default_durations = ?, reminder_policy = ?, escalation_policies = ?, version = ?, is_template = ?, is_active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&def.name)
        .bind(&def.description)
        .bind(&def.module)
        .bind(&def.category)
        .bind(to_json(&def.tags)?)
        .bind(to_json(&def.steps)?)
        .bind(to_json(&def.transitions)?)
        .bind(to_json(&def.default_durations)?)
        .bind(def.reminder_policy.as_ref().map(to_json).transpose()?)
        .bind(to_json(&def.escalation_policies)?)
        .bind(def.version)
        .bind(def.is_template)
        .bind(def.is_active)
        .bind(format_datetime(&def.updated_at))
        .bind(def.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        write_snapshot(&mut *tx, def).await?;
        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn upsert_global(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        if def.tenant_id.is_some() {
            return Err(RepositoryError::Query(
                "upsert_global requires a definition without a tenant".to_string(),
            ));
        }
        self.write(def, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::test_support::test_pool;
    use chrono::Utc;
    use hrflow_types::workflow::{
        AssigneeRole, CompletionPolicy, NotificationToggles, ParallelBranch, StepConfig,
        StepDefinition, TransitionDefinition, TransitionTrigger,
    };
    use std::collections::HashMap;

    fn make_definition(name: &str, tenant_id: Option<Uuid>) -> WorkflowDefinition {
        let now = Utc::now();
        WorkflowDefinition {
            id: Uuid::now_v7(),
            tenant_id,
            name: name.to_string(),
            slug: hrflow_types::workflow::slugify(name),
            description: Some("test".to_string()),
            module: Some("onboarding".to_string()),
            category: None,
            tags: vec!["new-hire".to_string()],
            steps: vec![
                StepDefinition {
                    id: "welcome".to_string(),
                    name: "Welcome".to_string(),
                    assignee_role: AssigneeRole::Employee,
                    config: StepConfig::Form { form_key: None },
                    default_duration_hours: Some(24),
                    optional: false,
                    skippable: false,
                    notifications: NotificationToggles::default(),
                },
                StepDefinition {
                    id: "equipment".to_string(),
                    name: "Equipment".to_string(),
                    assignee_role: AssigneeRole::HrAdmin,
                    config: StepConfig::Parallel {
                        branches: vec![ParallelBranch {
                            id: "laptop".to_string(),
                            name: "Laptop".to_string(),
                            assignee_role: AssigneeRole::HrAdmin,
                        }],
                        completion: CompletionPolicy::All,
                    },
                    default_duration_hours: None,
                    optional: true,
                    skippable: false,
                    notifications: NotificationToggles::default(),
                },
            ],
            transitions: vec![TransitionDefinition {
                id: "t1".to_string(),
                from: "welcome".to_string(),
                to: "equipment".to_string(),
                trigger: TransitionTrigger::FormSubmitted,
                conditions: Vec::new(),
                combinator: Default::default(),
                ui: None,
            }],
            default_durations: HashMap::from([("equipment".to_string(), 72)]),
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

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        let repo = SqliteDefinitionRepository::new(test_pool().await);
        let tenant = Uuid::now_v7();
        let def = make_definition("Onboarding", Some(tenant));

        repo.create(&def).await.unwrap();

        let found = repo.get(&def.id).await.unwrap().unwrap();
        assert_eq!(found.steps, def.steps);
        assert_eq!(found.transitions, def.transitions);
        assert_eq!(found.default_durations.get("equipment"), Some(&72));
        assert_eq!(found.tenant_id, Some(tenant));

        let by_slug = repo.get_by_slug(Some(&tenant), "onboarding").await.unwrap();
        assert_eq!(by_slug.map(|d| d.id), Some(def.id));
        assert!(repo.get_by_slug(None, "onboarding").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_slug_unique_per_scope() {
        let repo = SqliteDefinitionRepository::new(test_pool().await);
        let tenant = Uuid::now_v7();

        repo.create(&make_definition("Offboarding", Some(tenant)))
            .await
            .unwrap();
        let err = repo
            .create(&make_definition("Offboarding", Some(tenant)))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        // Same slug in another tenant and in the global scope is fine.
        repo.create(&make_definition("Offboarding", Some(Uuid::now_v7())))
            .await
            .unwrap();
        repo.create(&make_definition("Offboarding", None)).await.unwrap();
        let err = repo
            .create(&make_definition("Offboarding", None))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_list_includes_global_and_filters() {
        let repo = SqliteDefinitionRepository::new(test_pool().await);
        let tenant = Uuid::now_v7();

        let mut global = make_definition("Annual review", None);
        global.is_system = true;
        global.module = Some("performance".to_string());
        repo.upsert_global(&global).await.unwrap();

        let mut inactive = make_definition("Probation", Some(tenant));
        inactive.is_active = false;
        repo.create(&inactive).await.unwrap();
        repo.create(&make_definition("Exit", Some(tenant))).await.unwrap();
        repo.create(&make_definition("Elsewhere", Some(Uuid::now_v7())))
            .await
            .unwrap();

        let all = repo.list(&tenant, &DefinitionFilter::default()).await.unwrap();
        let names: Vec<_> = all.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Annual review", "Exit", "Probation"]);

        let active = repo
            .list(
                &tenant,
                &DefinitionFilter {
                    is_active: Some(true),
                    exclude_system: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Exit");

        let performance = repo
            .list(
                &tenant,
                &DefinitionFilter {
                    module: Some("performance".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(performance.len(), 1);
        assert!(performance[0].is_system);
    }

    #[tokio::test]
    async fn test_update_and_upsert_global() {
        let repo = SqliteDefinitionRepository::new(test_pool().await);

        let mut def = make_definition("Promotion", Some(Uuid::now_v7()));
        repo.create(&def).await.unwrap();
        def.name = "Promotion request".to_string();
        def.version = 2;
        def.steps.truncate(1);
        repo.update(&def).await.unwrap();

        let found = repo.get(&def.id).await.unwrap().unwrap();
        assert_eq!(found.name, "Promotion request");
        assert_eq!(found.version, 2);
        assert_eq!(found.steps.len(), 1);

        let missing = make_definition("Ghost", None);
        let err = repo.update(&missing).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));

        let mut template = make_definition("Template", None);
        repo.upsert_global(&template).await.unwrap();
        template.version = 3;
        repo.upsert_global(&template).await.unwrap();
        let found = repo.get_by_slug(None, "template").await.unwrap().unwrap();
        assert_eq!(found.version, 3);

        let err = repo.upsert_global(&def).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Query(_)));
    }

    #[tokio::test]
    async fn test_versions_are_snapshotted() {
        let repo = SqliteDefinitionRepository::new(test_pool().await);

        let mut def = make_definition("Relocation", Some(Uuid::now_v7()));
        repo.create(&def).await.unwrap();
        def.version = 2;
        def.steps.truncate(1);
        def.transitions.clear();
        repo.update(&def).await.unwrap();

        let v1 = repo.get_version(&def.id, 1).await.unwrap().unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v1.steps.len(), 2);
        assert_eq!(v1.transitions.len(), 1);

        let v2 = repo.get_version(&def.id, 2).await.unwrap().unwrap();
        assert_eq!(v2.steps.len(), 1);
        assert!(repo.get_version(&def.id, 3).await.unwrap().is_none());

        // Same version, new name: the snapshot follows.
        def.name = "Relocation v2".to_string();
        repo.update(&def).await.unwrap();
        let v2 = repo.get_version(&def.id, 2).await.unwrap().unwrap();
        assert_eq!(v2.name, "Relocation v2");

        let template = make_definition("Global relocation", None);
        repo.upsert_global(&template).await.unwrap();
        assert!(repo.get_version(&template.id, 1).await.unwrap().is_some());
    }
}

//! Definition store: authoring and reading versioned workflow definitions.
//!
//! Tenants see their own definitions plus the global (system) ones. Writes
//! require an HR-privileged caller and never touch global definitions, which
//! are only seeded from system templates.

use std::sync::Arc;

use chrono::Utc;
use hrflow_types::auth::AuthContext;
use hrflow_types::error::{EngineError, RepositoryError};
use hrflow_types::workflow::{
    CreateDefinitionRequest, UpdateDefinitionRequest, WorkflowDefinition, slugify,
};
use uuid::Uuid;

use super::definition::{
    parse_definition_yaml, serialize_definition_yaml, structure_changed, validate_definition,
};
use crate::repository::definition::{DefinitionFilter, DefinitionRepository};

/// Attempts at a random-suffixed slug before giving up.
const SLUG_ATTEMPTS: usize = 5;

/// Service owning definition CRUD.
pub struct DefinitionStore<R: DefinitionRepository> {
    repo: Arc<R>,
}

impl<R: DefinitionRepository> DefinitionStore<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Create a definition in the caller's tenant.
    ///
    /// An explicit slug is used as given (after slugification) and conflicts
    /// if taken. Otherwise the slug is the slugified name plus a random
    /// six-character suffix.
    pub async fn create(
        &self,
        auth: &AuthContext,
        request: CreateDefinitionRequest,
    ) -> Result<WorkflowDefinition, EngineError> {
        auth.require_hr("create workflow definitions")?;
        let def = self.build(Some(auth.tenant_id), Some(auth.employee_id), request);
        validate_definition(&def)?;
        let def = self.insert_with_slug(def).await?;
        tracing::info!(definition_id = %def.id, slug = %def.slug, "workflow definition created");
        Ok(def)
    }

    /// Import a YAML document as a new definition in the caller's tenant.
    pub async fn import_yaml(
        &self,
        auth: &AuthContext,
        yaml: &str,
    ) -> Result<WorkflowDefinition, EngineError> {
        let request = parse_definition_yaml(yaml)?;
        self.create(auth, request).await
    }

    /// Export a visible definition as YAML.
    pub async fn export_yaml(&self, auth: &AuthContext, id: &Uuid) -> Result<String, EngineError> {
        let def = self.get(auth, id).await?;
        serialize_definition_yaml(&def)
    }

    /// Apply a partial update. Structural changes bump the version.
    pub async fn update(
        &self,
        auth: &AuthContext,
        id: &Uuid,
        request: UpdateDefinitionRequest,
    ) -> Result<WorkflowDefinition, EngineError> {
        auth.require_hr("edit workflow definitions")?;
        let mut def = self.get_writable(auth, id).await?;

        let bump = structure_changed(&def, request.steps.as_ref(), request.transitions.as_ref());

        if let Some(name) = request.name {
            def.name = name;
        }
        if let Some(description) = request.description {
            def.description = Some(description);
        }
        if let Some(module) = request.module {
            def.module = Some(module);
        }
        if let Some(category) = request.category {
            def.category = Some(category);
        }
        if let Some(tags) = request.tags {
            def.tags = tags;
        }
        if let Some(steps) = request.steps {
            def.steps = steps;
        }
        if let Some(transitions) = request.transitions {
            def.transitions = transitions;
        }
        if let Some(durations) = request.default_durations {
            def.default_durations = durations;
        }
        if let Some(policy) = request.reminder_policy {
            def.reminder_policy = Some(policy);
        }
        if let Some(policies) = request.escalation_policies {
            def.escalation_policies = policies;
        }
        if let Some(is_template) = request.is_template {
            def.is_template = is_template;
        }
        if let Some(is_active) = request.is_active {
            def.is_active = is_active;
        }
        if bump {
            def.version += 1;
        }
        def.updated_at = Utc::now();

        validate_definition(&def)?;
        self.repo.update(&def).await?;
        tracing::info!(
            definition_id = %def.id,
            version = def.version,
            structural = bump,
            "workflow definition updated"
        );
        Ok(def)
    }

    /// Copy a visible definition (system templates included) into the
    /// caller's tenant. The copy always starts inactive.
    pub async fn clone_definition(
        &self,
        auth: &AuthContext,
        id: &Uuid,
        new_name: &str,
    ) -> Result<WorkflowDefinition, EngineError> {
        auth.require_hr("clone workflow definitions")?;
        let source = self.get(auth, id).await?;
        let name = new_name.trim();
        if name.is_empty() {
            return Err(EngineError::bad_request("clone name must not be empty"));
        }

        let now = Utc::now();
        let copy = WorkflowDefinition {
            id: Uuid::now_v7(),
            tenant_id: Some(auth.tenant_id),
            name: name.to_string(),
            slug: String::new(),
            version: 1,
            is_active: false,
            is_system: false,
            created_by: Some(auth.employee_id),
            created_at: now,
            updated_at: now,
            ..source
        };
        let copy = self.insert_with_slug(copy).await?;
        tracing::info!(source_id = %id, definition_id = %copy.id, "workflow definition cloned");
        Ok(copy)
    }

    /// Soft delete: the definition is deactivated, not removed.
    pub async fn delete(&self, auth: &AuthContext, id: &Uuid) -> Result<WorkflowDefinition, EngineError> {
        auth.require_hr("delete workflow definitions")?;
        let mut def = self.get_writable(auth, id).await?;
        def.is_active = false;
        def.updated_at = Utc::now();
        self.repo.update(&def).await?;
        tracing::info!(definition_id = %def.id, "workflow definition deactivated");
        Ok(def)
    }

    pub async fn list(
        &self,
        auth: &AuthContext,
        filter: &DefinitionFilter,
    ) -> Result<Vec<WorkflowDefinition>, EngineError> {
        Ok(self.repo.list(&auth.tenant_id, filter).await?)
    }

    /// A definition visible to the caller: owned by their tenant or global.
    pub async fn get(&self, auth: &AuthContext, id: &Uuid) -> Result<WorkflowDefinition, EngineError> {
        self.repo
            .get(id)
            .await?
            .filter(|d| d.tenant_id.is_none_or(|t| t == auth.tenant_id))
            .ok_or_else(|| EngineError::not_found("workflow definition"))
    }

    /// Look up by slug, preferring the caller's tenant over global.
    pub async fn get_by_slug(
        &self,
        auth: &AuthContext,
        slug: &str,
    ) -> Result<WorkflowDefinition, EngineError> {
        if let Some(def) = self.repo.get_by_slug(Some(&auth.tenant_id), slug).await? {
            return Ok(def);
        }
        self.repo
            .get_by_slug(None, slug)
            .await?
            .ok_or_else(|| EngineError::not_found("workflow definition"))
    }

    /// Seed or refresh a global system template keyed by slug.
    ///
    /// An existing template keeps its id and creation time; its version is
    /// bumped when the structure changed.
    pub async fn upsert_system_template(
        &self,
        request: CreateDefinitionRequest,
    ) -> Result<WorkflowDefinition, EngineError> {
        let slug = request
            .slug
            .as_deref()
            .map(slugify)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| slugify(&request.name));
        if slug.is_empty() {
            return Err(EngineError::Validation(
                "system template needs a name or slug".to_string(),
            ));
        }

        let mut def = self.build(None, None, request);
        def.slug = slug;
        def.is_system = true;
        validate_definition(&def)?;

        if let Some(existing) = self.repo.get_by_slug(None, &def.slug).await? {
            let bump = structure_changed(&existing, Some(&def.steps), Some(&def.transitions));
            def.id = existing.id;
            def.created_at = existing.created_at;
            def.version = if bump { existing.version + 1 } else { existing.version };
        }
        self.repo.upsert_global(&def).await?;
        tracing::debug!(slug = %def.slug, version = def.version, "system template loaded");
        Ok(def)
    }

    /// Owned by the caller's tenant; global definitions are read-only.
    async fn get_writable(&self, auth: &AuthContext, id: &Uuid) -> Result<WorkflowDefinition, EngineError> {
        let def = self.get(auth, id).await?;
        if def.is_system || def.is_global() {
            return Err(EngineError::bad_request(
                "system workflow definitions are read-only",
            ));
        }
        Ok(def)
    }

    fn build(
        &self,
        tenant_id: Option<Uuid>,
        created_by: Option<Uuid>,
        request: CreateDefinitionRequest,
    ) -> WorkflowDefinition {
        let now = Utc::now();
        WorkflowDefinition {
            id: Uuid::now_v7(),
            tenant_id,
            name: request.name.trim().to_string(),
            slug: request.slug.as_deref().map(slugify).unwrap_or_default(),
            description: request.description,
            module: request.module,
            category: request.category,
            tags: request.tags,
            steps: request.steps,
            transitions: request.transitions,
            default_durations: request.default_durations,
            reminder_policy: request.reminder_policy,
            escalation_policies: request.escalation_policies,
            version: 1,
            is_template: request.is_template,
            is_active: request.is_active,
            is_system: false,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    /// Insert, honoring an explicit slug or generating a suffixed one.
    async fn insert_with_slug(&self, mut def: WorkflowDefinition) -> Result<WorkflowDefinition, EngineError> {
        if !def.slug.is_empty() {
            if self
                .repo
                .get_by_slug(def.tenant_id.as_ref(), &def.slug)
                .await?
                .is_some()
            {
                return Err(EngineError::Conflict(format!(
                    "slug '{}' is already in use",
                    def.slug
                )));
            }
            self.repo.create(&def).await?;
            return Ok(def);
        }

        let base = match slugify(&def.name) {
            s if s.is_empty() => "workflow".to_string(),
            s => s,
        };
        for _ in 0..SLUG_ATTEMPTS {
            def.slug = format!("{base}-{}", random_suffix());
            match self.repo.create(&def).await {
                Ok(()) => return Ok(def),
                Err(RepositoryError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Conflict(format!(
            "could not generate a unique slug from '{base}'"
        )))
    }
}

fn random_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestEngine, create_request, form_step, transition};
    use hrflow_types::auth::CallerRole;
    use hrflow_types::workflow::TransitionTrigger;

    #[tokio::test]
    async fn test_create_derives_suffixed_slug() {
        let engine = TestEngine::new();
        let def = engine
            .store
            .create(&engine.hr, create_request("Annual Review", vec![form_step("a")]))
            .await
            .unwrap();
        assert!(def.slug.starts_with("annual-review-"));
        assert_eq!(def.slug.len(), "annual-review-".len() + 6);
        assert_eq!(def.version, 1);
        assert_eq!(def.tenant_id, Some(engine.hr.tenant_id));
        assert_eq!(def.created_by, Some(engine.hr.employee_id));
    }

    #[tokio::test]
    async fn test_explicit_slug_conflicts() {
        let engine = TestEngine::new();
        let mut request = create_request("Onboarding", vec![form_step("a")]);
        request.slug = Some("Onboarding".to_string());
        let def = engine.store.create(&engine.hr, request.clone()).await.unwrap();
        assert_eq!(def.slug, "onboarding");

        let err = engine.store.create(&engine.hr, request).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_create_validates_transition_endpoints() {
        let engine = TestEngine::new();
        let mut request = create_request("Broken", vec![form_step("a")]);
        request.transitions = vec![transition("t", "a", "ghost", TransitionTrigger::Manual)];
        let err = engine.store.create(&engine.hr, request).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_writes_require_hr() {
        let engine = TestEngine::new();
        let err = engine
            .store
            .create(&engine.employee, create_request("X", vec![form_step("a")]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_update_bumps_version_only_on_structure() {
        let engine = TestEngine::new();
        let def = engine
            .store
            .create(&engine.hr, create_request("Review", vec![form_step("a")]))
            .await
            .unwrap();

        let renamed = engine
            .store
            .update(
                &engine.hr,
                &def.id,
                UpdateDefinitionRequest {
                    name: Some("Review 2026".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.version, 1);
        assert_eq!(renamed.name, "Review 2026");

        let restructured = engine
            .store
            .update(
                &engine.hr,
                &def.id,
                UpdateDefinitionRequest {
                    steps: Some(vec![form_step("a"), form_step("b")]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(restructured.version, 2);

        // Same steps again: no structural change.
        let same = engine
            .store
            .update(
                &engine.hr,
                &def.id,
                UpdateDefinitionRequest {
                    steps: Some(vec![form_step("a"), form_step("b")]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(same.version, 2);
    }

    #[tokio::test]
    async fn test_clone_is_always_inactive() {
        let engine = TestEngine::new();
        let mut request = create_request("Offboarding", vec![form_step("a")]);
        request.is_active = true;
        let source = engine.store.create(&engine.hr, request).await.unwrap();

        let copy = engine
            .store
            .clone_definition(&engine.hr, &source.id, "Offboarding (EU)")
            .await
            .unwrap();
        assert!(!copy.is_active);
        assert!(!copy.is_system);
        assert_ne!(copy.id, source.id);
        assert_ne!(copy.slug, source.slug);
        assert_eq!(copy.steps, source.steps);
        assert_eq!(copy.version, 1);
    }

    #[tokio::test]
    async fn test_system_templates_are_read_only_but_cloneable() {
        let engine = TestEngine::new();
        let template = engine
            .store
            .upsert_system_template(create_request("Performance Review", vec![form_step("a")]))
            .await
            .unwrap();
        assert!(template.is_system);
        assert!(template.tenant_id.is_none());
        assert_eq!(template.slug, "performance-review");

        let err = engine
            .store
            .update(&engine.hr, &template.id, UpdateDefinitionRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));
        let err = engine.store.delete(&engine.hr, &template.id).await.unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));

        let by_slug = engine
            .store
            .get_by_slug(&engine.employee, "performance-review")
            .await
            .unwrap();
        assert_eq!(by_slug.id, template.id);

        let copy = engine
            .store
            .clone_definition(&engine.hr, &template.id, "Our Review")
            .await
            .unwrap();
        assert_eq!(copy.tenant_id, Some(engine.hr.tenant_id));
        assert!(!copy.is_active);
    }

    #[tokio::test]
    async fn test_upsert_system_template_keeps_identity() {
        let engine = TestEngine::new();
        let first = engine
            .store
            .upsert_system_template(create_request("Training", vec![form_step("a")]))
            .await
            .unwrap();
        let again = engine
            .store
            .upsert_system_template(create_request("Training", vec![form_step("a")]))
            .await
            .unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.version, 1);

        let changed = engine
            .store
            .upsert_system_template(create_request(
                "Training",
                vec![form_step("a"), form_step("b")],
            ))
            .await
            .unwrap();
        assert_eq!(changed.id, first.id);
        assert_eq!(changed.version, 2);
    }

    #[tokio::test]
    async fn test_delete_is_soft() {
        let engine = TestEngine::new();
        let def = engine
            .store
            .create(&engine.hr, create_request("Temp", vec![form_step("a")]))
            .await
            .unwrap();
        let deleted = engine.store.delete(&engine.hr, &def.id).await.unwrap();
        assert!(!deleted.is_active);
        let still_there = engine.store.get(&engine.hr, &def.id).await.unwrap();
        assert!(!still_there.is_active);
    }

    #[tokio::test]
    async fn test_other_tenant_definition_is_not_found() {
        let engine = TestEngine::new();
        let def = engine
            .store
            .create(&engine.hr, create_request("Private", vec![form_step("a")]))
            .await
            .unwrap();
        let outsider = AuthContext::new(Uuid::now_v7(), Uuid::now_v7(), CallerRole::HrAdmin);
        let err = engine.store.get(&outsider, &def.id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        let err = engine
            .store
            .update(&outsider, &def.id, UpdateDefinitionRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_yaml_import_export() {
        let engine = TestEngine::new();
        let def = engine
            .store
            .create(&engine.hr, create_request("Exported", vec![form_step("a"), form_step("b")]))
            .await
            .unwrap();
        let yaml = engine.store.export_yaml(&engine.hr, &def.id).await.unwrap();

        // Re-importing into another tenant keeps the slug.
        let other = AuthContext::new(Uuid::now_v7(), Uuid::now_v7(), CallerRole::HrAdmin);
        let imported = engine.store.import_yaml(&other, &yaml).await.unwrap();
        assert_eq!(imported.slug, def.slug);
        assert_eq!(imported.steps, def.steps);
        assert_eq!(imported.tenant_id, Some(other.tenant_id));
    }
}

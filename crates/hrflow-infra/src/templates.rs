//! System template loader.
//!
//! Every `*.yaml` / `*.yml` file in the templates directory is parsed as a
//! definition document and seeded as a global, read-only definition. A file
//! that fails to parse or validate is logged and skipped; the rest still load.

use std::path::{Path, PathBuf};

use hrflow_core::repository::definition::DefinitionRepository;
use hrflow_core::workflow::definition::parse_definition_yaml;
use hrflow_core::workflow::store::DefinitionStore;
use hrflow_types::error::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("cannot read templates directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a template load did.
#[derive(Debug, Default)]
pub struct TemplateLoadReport {
    /// Slugs of the templates seeded or refreshed.
    pub loaded: Vec<String>,
    /// Files that were skipped, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

/// Seed all templates found in `dir`, in file-name order.
pub async fn load_system_templates<R: DefinitionRepository>(
    store: &DefinitionStore<R>,
    dir: &Path,
) -> Result<TemplateLoadReport, TemplateError> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|source| TemplateError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|source| TemplateError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
    {
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if is_yaml {
            files.push(path);
        }
    }
    files.sort();

    let mut report = TemplateLoadReport::default();
    for path in files {
        match load_one(store, &path).await {
            Ok(slug) => report.loaded.push(slug),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping system template");
                report.failed.push((path, e.to_string()));
            }
        }
    }

    tracing::info!(
        dir = %dir.display(),
        loaded = report.loaded.len(),
        failed = report.failed.len(),
        "system templates loaded"
    );
    Ok(report)
}

async fn load_one<R: DefinitionRepository>(
    store: &DefinitionStore<R>,
    path: &Path,
) -> Result<String, EngineError> {
    let yaml = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| EngineError::Validation(format!("read error: {e}")))?;
    let request = parse_definition_yaml(&yaml)?;
    let def = store.upsert_system_template(request).await?;
    Ok(def.slug)
}

//! System template seeding.

use std::path::PathBuf;

use anyhow::{Result, bail};
use console::style;

use hrflow_infra::templates::{TemplateLoadReport, load_system_templates};

use crate::state::AppState;

/// Load templates from `dir`, or from the configured `templates_dir`.
pub async fn load_templates(
    state: &AppState,
    dir: Option<PathBuf>,
    json: bool,
) -> Result<TemplateLoadReport> {
    let Some(dir) = dir.or_else(|| state.config.templates_dir.clone()) else {
        bail!("no template directory given and templates_dir is not set in config.toml");
    };
    let report = load_system_templates(&state.engine.store, &dir).await?;

    if json {
        let failed: Vec<_> = report
            .failed
            .iter()
            .map(|(path, reason)| serde_json::json!({ "path": path, "error": reason }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "loaded": report.loaded,
                "failed": failed,
            }))?
        );
        return Ok(report);
    }

    println!();
    for slug in &report.loaded {
        println!("  {} {}", style("✓").green(), slug);
    }
    for (path, reason) in &report.failed {
        println!("  {} {}: {}", style("✗").red(), path.display(), style(reason).dim());
    }
    println!();
    println!(
        "  {} loaded, {} failed",
        style(report.loaded.len()).bold(),
        style(report.failed.len()).bold()
    );
    println!();
    Ok(report)
}

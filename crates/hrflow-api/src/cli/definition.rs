//! Definition import, export and listing.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use hrflow_core::repository::definition::DefinitionFilter;
use hrflow_types::auth::AuthContext;
use hrflow_types::workflow::WorkflowDefinition;

use crate::state::AppState;

pub async fn list_definitions(
    state: &AppState,
    auth: &AuthContext,
    module: Option<String>,
    json: bool,
) -> Result<Vec<WorkflowDefinition>> {
    let filter = DefinitionFilter {
        module,
        ..Default::default()
    };
    let defs = state.engine.store.list(auth, &filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&defs)?);
        return Ok(defs);
    }

    if defs.is_empty() {
        println!();
        println!(
            "  {} No workflow definitions. Import one with: {}",
            style("i").blue().bold(),
            style("hrflow definitions import <file.yaml> --tenant <id>").yellow()
        );
        println!();
        return Ok(defs);
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Name").fg(Color::White),
        Cell::new("Slug").fg(Color::White),
        Cell::new("Module").fg(Color::White),
        Cell::new("Steps").fg(Color::White),
        Cell::new("Version").fg(Color::White),
        Cell::new("Status").fg(Color::White),
    ]);

    for def in &defs {
        let status = match (def.is_system, def.is_active) {
            (true, _) => Cell::new("◆ system").fg(Color::Blue),
            (false, true) => Cell::new("● active").fg(Color::Green),
            (false, false) => Cell::new("○ inactive").fg(Color::DarkGrey),
        };
        table.add_row(vec![
            Cell::new(&def.name).fg(Color::Cyan),
            Cell::new(&def.slug),
            Cell::new(def.module.as_deref().unwrap_or("-")),
            Cell::new(def.steps.len()),
            Cell::new(format!("v{}", def.version)),
            status,
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} definition{}",
        style(defs.len()).bold(),
        if defs.len() == 1 { "" } else { "s" }
    );
    println!();
    Ok(defs)
}

pub async fn import_definition(
    state: &AppState,
    auth: &AuthContext,
    file: &Path,
    json: bool,
) -> Result<WorkflowDefinition> {
    let yaml = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("cannot read {}", file.display()))?;
    let def = state.engine.store.import_yaml(auth, &yaml).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&def)?);
    } else {
        println!();
        println!(
            "  {} Imported '{}' as {} ({} steps)",
            style("✓").green().bold(),
            style(&def.name).cyan(),
            style(&def.slug).yellow(),
            def.steps.len()
        );
        println!("  {}", style(format!("id: {}", def.id)).dim());
        println!();
    }
    Ok(def)
}

pub async fn export_definition(state: &AppState, auth: &AuthContext, id: &Uuid) -> Result<String> {
    let yaml = state.engine.store.export_yaml(auth, id).await?;
    print!("{yaml}");
    Ok(yaml)
}

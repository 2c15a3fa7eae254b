//! Employee directory sync.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use hrflow_types::employee::Employee;

use crate::state::AppState;

/// Upsert every employee in a JSON array file. Returns how many were written.
pub async fn import_employees(state: &AppState, file: &Path, json: bool) -> Result<usize> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("cannot read {}", file.display()))?;
    let employees: Vec<Employee> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of employees", file.display()))?;

    for employee in &employees {
        state.directory.upsert(employee).await?;
    }
    tracing::info!(count = employees.len(), file = %file.display(), "employees imported");

    if json {
        println!("{}", serde_json::json!({ "imported": employees.len() }));
    } else {
        println!();
        println!(
            "  {} Imported {} employee{}",
            style("✓").green().bold(),
            style(employees.len()).bold(),
            if employees.len() == 1 { "" } else { "s" }
        );
        println!();
    }
    Ok(employees.len())
}

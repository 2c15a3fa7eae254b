//! HRFlow CLI and REST API entry point.
//!
//! Binary name: `hrflow`
//!
//! Loads configuration, installs tracing, opens the database and then either
//! runs an operator command or serves the REST API.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;
use console::style;

use cli::{Cli, Commands, DefinitionCommand, EmployeeCommand, TemplateCommand};
use hrflow_infra::config::load_engine_config;
use hrflow_infra::sqlite::pool::{data_dir, default_database_url};
use hrflow_observe::tracing_setup::{init_tracing, shutdown_tracing};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "hrflow", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = data_dir();
    let config = load_engine_config(&data_dir).await;
    init_tracing(cli.log_format, config.enable_otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let database_url = cli.database_url.clone().unwrap_or_else(default_database_url);
    let state = AppState::init(data_dir, &database_url, config).await?;

    let result = run(cli, state).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli, state: AppState) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve { port, host } => {
            if let Some(report) = state.load_configured_templates().await? {
                tracing::info!(
                    loaded = report.loaded.len(),
                    failed = report.failed.len(),
                    "system templates seeded"
                );
            }

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            println!(
                "  {} HRFlow API listening on {}",
                style("⚡").bold(),
                style(format!("http://{addr}")).cyan()
            );
            println!(
                "  {}",
                style(format!("Data directory: {}", state.data_dir.display())).dim()
            );
            println!("  {}", style("Press Ctrl+C to stop").dim());

            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            println!("\n  Server stopped.");
        }

        Commands::Employees { action } => match action {
            EmployeeCommand::Import { file } => {
                cli::employee::import_employees(&state, &file, cli.json).await?;
            }
        },

        Commands::Definitions { action } => match action {
            DefinitionCommand::List { tenant, module } => {
                cli::definition::list_definitions(&state, &tenant.auth(), module, cli.json).await?;
            }
            DefinitionCommand::Import { file, tenant } => {
                cli::definition::import_definition(&state, &tenant.auth(), &file, cli.json).await?;
            }
            DefinitionCommand::Export { id, tenant } => {
                cli::definition::export_definition(&state, &tenant.auth(), &id).await?;
            }
        },

        Commands::Templates { action } => match action {
            TemplateCommand::Load { dir } => {
                cli::template::load_templates(&state, dir, cli.json).await?;
            }
        },

        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

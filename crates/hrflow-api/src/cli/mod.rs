//! CLI command definitions for the `hrflow` binary.
//!
//! Uses clap derive macros for argument parsing. Besides `serve`, the
//! commands are operator tools: syncing the employee directory, moving
//! definitions in and out as YAML, and seeding system templates.

pub mod definition;
pub mod employee;
pub mod template;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use uuid::Uuid;

use hrflow_observe::tracing_setup::LogFormat;
use hrflow_types::auth::{AuthContext, CallerRole};

/// Run HR workflows.
#[derive(Parser)]
#[command(name = "hrflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Log output format (pretty, json).
    #[arg(long, global = true, default_value = "pretty", value_parser = parse_log_format)]
    pub log_format: LogFormat,

    /// SQLite database URL. Defaults to `{data_dir}/hrflow.db`.
    #[arg(long, global = true, env = "HRFLOW_DATABASE_URL")]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    s.parse()
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Manage the local employee directory mirror.
    Employees {
        #[command(subcommand)]
        action: EmployeeCommand,
    },

    /// Import, export and list workflow definitions.
    #[command(alias = "defs")]
    Definitions {
        #[command(subcommand)]
        action: DefinitionCommand,
    },

    /// Seed global system templates.
    Templates {
        #[command(subcommand)]
        action: TemplateCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum EmployeeCommand {
    /// Upsert employees from a JSON array file.
    Import {
        /// Path to a JSON file: `[{"id", "tenant_id", "manager_id", "display_name"}, ...]`.
        file: std::path::PathBuf,
    },
}

/// Tenant and operator identity for commands that act inside a tenant.
#[derive(clap::Args)]
pub struct TenantArgs {
    /// Tenant to act in.
    #[arg(long)]
    pub tenant: Uuid,

    /// Operator employee id recorded as the author.
    #[arg(long = "as", default_value_t = Uuid::nil())]
    pub operator: Uuid,
}

impl TenantArgs {
    /// Operators act with the system administrator role.
    pub fn auth(&self) -> AuthContext {
        AuthContext::new(self.tenant, self.operator, CallerRole::SystemAdmin)
    }
}

#[derive(Subcommand)]
pub enum DefinitionCommand {
    /// List definitions visible to a tenant.
    #[command(alias = "ls")]
    List {
        #[command(flatten)]
        tenant: TenantArgs,

        /// Only definitions of this module.
        #[arg(long)]
        module: Option<String>,
    },

    /// Create a definition from a YAML file.
    Import {
        file: std::path::PathBuf,

        #[command(flatten)]
        tenant: TenantArgs,
    },

    /// Print a definition as YAML.
    Export {
        id: Uuid,

        #[command(flatten)]
        tenant: TenantArgs,
    },
}

#[derive(Subcommand)]
pub enum TemplateCommand {
    /// Load every YAML template in a directory.
    Load {
        /// Template directory. Defaults to `templates_dir` from config.toml.
        dir: Option<std::path::PathBuf>,
    },
}

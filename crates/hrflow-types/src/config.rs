//! Engine configuration types.
//!
//! `EngineConfig` represents the top-level `config.toml` in the data
//! directory. Every field has a default so an empty or missing file is valid.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How a rejected approval picks its outgoing transition.
    #[serde(default)]
    pub rejection_routing: RejectionRouting,

    /// Prefix for generated instance reference numbers (`WF-20260101-1A2B3C`).
    #[serde(default = "default_reference_prefix")]
    pub reference_prefix: String,

    /// Directory of YAML system templates loaded at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates_dir: Option<PathBuf>,

    /// Export spans through OpenTelemetry in addition to the fmt layer.
    #[serde(default)]
    pub enable_otel: bool,
}

fn default_reference_prefix() -> String {
    "WF".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rejection_routing: RejectionRouting::default(),
            reference_prefix: default_reference_prefix(),
            templates_dir: None,
            enable_otel: false,
        }
    }
}

/// Transition selection after an approval step is rejected.
///
/// - `PreferOutcome`: a transition with trigger `rejected` wins over any
///   generic (`manual` / `form_submitted`) transition from the same step.
/// - `FirstMatch`: the first transition in declaration order whose trigger is
///   any of `rejected`, `approved`, `manual`, `form_submitted` wins, so a
///   rejection can follow the approval path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionRouting {
    #[default]
    PreferOutcome,
    FirstMatch,
}

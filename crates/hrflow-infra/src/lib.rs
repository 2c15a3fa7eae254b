//! Infrastructure layer for HRFlow.
//!
//! Contains implementations of the ports defined in `hrflow-core`: SQLite
//! storage for definitions, instances and the employee directory, the
//! `config.toml` loader, and the system-template loader.

pub mod config;
pub mod sqlite;
pub mod templates;

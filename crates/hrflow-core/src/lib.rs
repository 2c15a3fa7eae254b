//! Workflow engine services and repository trait definitions for HRFlow.
//!
//! This crate defines the "ports" (repository and directory traits) that the
//! infrastructure layer implements, and the engine services built on them.
//! It depends only on `hrflow-types` -- never on `hrflow-infra` or any
//! database/IO crate.

pub mod repository;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

//! Shared domain types for HRFlow.
//!
//! This crate contains the core domain types used across the engine:
//! workflow definitions, runtime instances and step instances, the caller
//! authorization context, engine configuration, and the error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod auth;
pub mod config;
pub mod employee;
pub mod error;
pub mod instance;
pub mod workflow;

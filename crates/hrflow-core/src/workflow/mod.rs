//! Workflow engine: definitions, routing, and instance execution.
//!
//! - `definition` -- validation and YAML import/export
//! - `store` -- definition CRUD with tenant scoping
//! - `assignee` -- role to employee resolution over the reporting line
//! - `condition` / `expression` -- transition guards and JEXL conditions
//! - `matcher` -- outcome-driven next-step lookup
//! - `advancer` -- the state transition from one step to the next
//! - `steps` -- actor decisions on step instances
//! - `instance` -- start / cancel / expire
//! - `locks` -- per-instance write serialization
//! - `dashboard` -- tenant aggregates
//! - `engine` -- wiring of the above

pub mod advancer;
pub mod assignee;
pub mod condition;
pub mod dashboard;
pub mod definition;
pub mod engine;
pub mod expression;
pub mod instance;
pub mod locks;
pub mod matcher;
pub mod steps;
pub mod store;

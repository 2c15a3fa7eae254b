//! Request extractors: gateway identity and list query parameters.

pub mod caller;
pub mod query;

//! HTTP request handlers for the REST API.

pub mod dashboard;
pub mod definition;
pub mod instance;
pub mod step;

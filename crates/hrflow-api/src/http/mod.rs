//! HTTP/REST API layer for HRFlow.
//!
//! Axum-based REST API at `/api/v1/`. The caller's tenant, identity and role
//! arrive as gateway headers; every response uses the envelope format.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;

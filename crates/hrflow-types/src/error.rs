use thiserror::Error;

/// Errors surfaced by engine operations (definition store, step actions,
/// instance lifecycle).
///
/// The first four variants form the caller-facing taxonomy; the API layer maps
/// them onto 404 / 403 / 400 / 409.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid workflow definition: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        EngineError::Forbidden(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        EngineError::BadRequest(msg.into())
    }
}

impl From<RepositoryError> for EngineError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound => EngineError::NotFound("record".to_string()),
            RepositoryError::Conflict(msg) => EngineError::Conflict(msg),
            other => EngineError::Storage(other.to_string()),
        }
    }
}

/// Errors from repository operations (used by trait definitions in hrflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

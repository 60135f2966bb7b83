/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the persistence layer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-name violation on policy save. The only conflict the API
    /// layer must distinguish (mapped to 409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown patch column or invalid enum value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

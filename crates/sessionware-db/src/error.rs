//! Error types for the storage layer.

/// Errors surfaced by the storage collaborator.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Failed to build the pool or check out a connection.
    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A statement or transaction command failed.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The session was used after it was closed.
    #[error("session is closed")]
    Closed,

    /// Creating a table from the schema failed.
    #[error("failed to create table `{table}`: {source}")]
    Schema {
        table: String,
        #[source]
        source: rusqlite::Error,
    },
}

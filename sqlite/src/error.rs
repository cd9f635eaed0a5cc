//! Error types for SQLite handle, model, and migration operations.
//!
//! Provides a unified error type covering authentication, driver access,
//! descriptor loading, and migration failures.

use thiserror::Error;

/// Errors that can occur during SQLite handle operations.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// SQLite database operation failure.
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    /// Opening the database or the liveness round-trip failed.
    #[error("authentication failed for connection '{connection}': {source}")]
    Authentication {
        connection: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The configured dialect has no driver in this crate.
    #[error("unsupported dialect '{0}': only 'sqlite' is available")]
    UnsupportedDialect(String),

    /// Handle was used after [`close`](crate::ConnectionHandle::close).
    #[error("connection '{0}' is closed")]
    Closed(String),

    /// A migration unit's steps raised an error; the run stopped there.
    #[error("migration '{migration}' failed: {source}")]
    MigrationFailed {
        migration: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The most recent migration has no `down` steps.
    #[error("migration '{0}' cannot be undone: it defines no down steps")]
    Irreversible(String),

    /// The ledger names a migration that is not in the migrations directory.
    #[error("applied migration '{0}' not found in migrations directory")]
    UnknownMigration(String),

    /// Descriptor or identifier failed validation at SQL generation time.
    #[error("validation error: {0}")]
    ValidationError(#[from] dbstrap_core::ValidationError),

    /// Error loading models or migrations from a setup directory.
    #[error("loader error: {0}")]
    LoaderError(#[from] dbstrap_setup::SetupError),
}

/// Convenience alias for results with [`SqliteError`].
pub type Result<T> = std::result::Result<T, SqliteError>;

//! Error taxonomy of the bootstrap component.

use dbstrap_setup::SetupError;
use dbstrap_sqlite::SqliteError;
use thiserror::Error;

/// An operation was invoked in the wrong lifecycle phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("not initialized")]
    NotInitialized,
    #[error("already initialized")]
    AlreadyInitialized,
    #[error("already d-initialized")]
    AlreadyDeinitialized,
}

/// A request conflicts with the resolved configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("connection identifier not found: {0}")]
    ConnectionNotFound(String),

    /// Manual migration requested for a connection that migrates on init.
    #[error("connection '{0}' applies migrations during init; run them through init instead")]
    AutoMigrating(String),

    #[error("connection '{0}' has no setupDir")]
    MissingSetupDir(String),

    #[error("malformed configuration: {0}")]
    Malformed(#[source] SetupError),
}

/// Top-level error of every [`DatabaseComponent`](crate::DatabaseComponent)
/// operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Opening or authenticating a connection failed.
    #[error("connection error: {0}")]
    Connection(#[source] SqliteError),

    /// A model or migration descriptor could not be loaded.
    #[error("schema error: {0}")]
    Schema(#[source] SetupError),

    /// A migration unit failed or cannot be reverted.
    #[error("migration error: {0}")]
    Migration(#[source] SqliteError),

    /// Any other driver failure.
    #[error("database error: {0}")]
    Database(#[source] SqliteError),
}

impl From<SetupError> for Error {
    fn from(err: SetupError) -> Self {
        match err {
            SetupError::MalformedConfig { .. } => Error::Config(ConfigError::Malformed(err)),
            other => Error::Schema(other),
        }
    }
}

impl From<SqliteError> for Error {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::Authentication { .. } | SqliteError::UnsupportedDialect(_) => {
                Error::Connection(err)
            }
            SqliteError::MigrationFailed { .. }
            | SqliteError::Irreversible(_)
            | SqliteError::UnknownMigration(_) => Error::Migration(err),
            SqliteError::LoaderError(setup) => setup.into(),
            other => Error::Database(other),
        }
    }
}

/// Convenience alias for results with [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_messages() {
        assert_eq!(StateError::NotInitialized.to_string(), "not initialized");
        assert_eq!(StateError::AlreadyInitialized.to_string(), "already initialized");
        assert_eq!(
            StateError::AlreadyDeinitialized.to_string(),
            "already d-initialized"
        );
        assert_eq!(
            Error::from(StateError::NotInitialized).to_string(),
            "not initialized"
        );
    }

    #[test]
    fn test_sqlite_errors_are_classified() {
        assert!(matches!(
            Error::from(SqliteError::UnsupportedDialect("mysql".into())),
            Error::Connection(_)
        ));
        assert!(matches!(
            Error::from(SqliteError::Irreversible("001".into())),
            Error::Migration(_)
        ));
        assert!(matches!(
            Error::from(SqliteError::Closed("main".into())),
            Error::Database(_)
        ));
        assert!(matches!(
            Error::from(SqliteError::LoaderError(SetupError::MissingSchema(
                "m.model.json".into()
            ))),
            Error::Schema(_)
        ));
    }
}

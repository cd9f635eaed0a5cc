//! Live, authenticated SQLite connections with a model registry.
//!
//! A [`ConnectionHandle`] owns one `rusqlite::Connection` behind a mutex,
//! so it can be shared across threads as `Arc<ConnectionHandle>`. Model
//! definitions registered on the handle are looked up by name.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use dbstrap_core::{ModelDefinition, TypeRegistry};
use dbstrap_setup::{ConnectionConfig, DEFAULT_DIALECT, OpenMode};
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info, warn};

use crate::error::{Result, SqliteError};

/// An open connection to one database, plus the models defined on it.
pub struct ConnectionHandle {
    name: String,
    database: String,
    logging: bool,
    conn: Mutex<Option<Connection>>,
    models: RwLock<BTreeMap<String, ModelDefinition>>,
    types: Arc<TypeRegistry>,
}

fn open_flags(mode: OpenMode) -> OpenFlags {
    let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    match mode {
        OpenMode::ReadWriteCreate => {
            base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        }
        OpenMode::ReadWrite => base | OpenFlags::SQLITE_OPEN_READ_WRITE,
        OpenMode::ReadOnly => base | OpenFlags::SQLITE_OPEN_READ_ONLY,
    }
}

impl ConnectionHandle {
    /// Opens the database named by `config` and verifies it with a
    /// round-trip query.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::UnsupportedDialect`] for non-SQLite dialects
    /// and [`SqliteError::Authentication`] when the database cannot be
    /// opened or does not answer.
    pub fn open(config: &ConnectionConfig, types: Arc<TypeRegistry>) -> Result<Self> {
        let dialect = &config.options.dialect;
        if !dialect.eq_ignore_ascii_case(DEFAULT_DIALECT) {
            return Err(SqliteError::UnsupportedDialect(dialect.clone()));
        }
        if config.password.as_deref().is_some_and(|p| !p.is_empty()) {
            debug!(connection = %config.name, "sqlite ignores credentials");
        }

        let auth_err = |source: rusqlite::Error| SqliteError::Authentication {
            connection: config.name.clone(),
            source,
        };
        let flags = open_flags(config.options.mode);
        let conn = if config.is_in_memory() {
            Connection::open_in_memory_with_flags(flags)
        } else {
            Connection::open_with_flags(&config.database, flags)
        }
        .map_err(auth_err)?;

        conn.busy_timeout(Duration::from_millis(config.options.busy_timeout_ms))?;
        if config.options.mode != OpenMode::ReadOnly {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        }

        let handle = Self {
            name: config.name.clone(),
            database: config.database.clone(),
            logging: config.options.logging,
            conn: Mutex::new(Some(conn)),
            models: RwLock::new(BTreeMap::new()),
            types,
        };
        handle.authenticate()?;
        info!(connection = %handle.name, database = %handle.database, "connection authenticated");
        Ok(handle)
    }

    /// Runs a trivial query to prove the connection is usable.
    pub fn authenticate(&self) -> Result<()> {
        let guard = self.lock();
        let conn = guard
            .as_ref()
            .ok_or_else(|| SqliteError::Closed(self.name.clone()))?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|source| SqliteError::Authentication {
                connection: self.name.clone(),
                source,
            })?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// The type namespace used to resolve column types on this handle.
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with exclusive access to the underlying connection.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut guard = self.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| SqliteError::Closed(self.name.clone()))?;
        Ok(f(conn)?)
    }

    /// Executes one or more statements outside any explicit transaction.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.log_sql(sql);
        self.with_connection(|conn| conn.execute_batch(sql))
    }

    pub(crate) fn log_sql(&self, sql: &str) {
        if self.logging {
            debug!(connection = %self.name, %sql, "executing");
        }
    }

    /// Returns `true` if `table` exists in the main schema.
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                [table],
                |row| row.get(0),
            )
        })
    }

    /// Lists user tables, sorted by name.
    pub fn table_names(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
    }

    /// Registers a model, replacing any previous definition of the same name.
    pub fn define(&self, model: ModelDefinition) -> Result<Option<ModelDefinition>> {
        self.define_all(vec![model])
            .map(|mut replaced| replaced.pop().flatten())
    }

    /// Registers several models under one write lock, so readers see
    /// either none or all of them.
    pub fn define_all(
        &self,
        models: Vec<ModelDefinition>,
    ) -> Result<Vec<Option<ModelDefinition>>> {
        if self.is_closed() {
            return Err(SqliteError::Closed(self.name.clone()));
        }
        let mut registry = self.models.write().unwrap_or_else(PoisonError::into_inner);
        Ok(models
            .into_iter()
            .map(|model| {
                debug!(connection = %self.name, model = %model.name, "model defined");
                registry.insert(model.name.clone(), model)
            })
            .collect())
    }

    pub fn model(&self, name: &str) -> Option<ModelDefinition> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Names of all registered models, sorted.
    pub fn model_names(&self) -> Vec<String> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    /// Closes the connection. Closing an already closed handle is a no-op.
    ///
    /// The handle counts as closed afterwards even if the driver reports an
    /// error while shutting down.
    pub fn close(&self) -> Result<()> {
        let Some(conn) = self.lock().take() else {
            return Ok(());
        };
        self.models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        match conn.close() {
            Ok(()) => {
                info!(connection = %self.name, "connection closed");
                Ok(())
            }
            Err((_conn, err)) => {
                warn!(connection = %self.name, error = %err, "connection closed with error");
                Err(err.into())
            }
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("name", &self.name)
            .field("database", &self.database)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbstrap_core::ColumnSchema;

    fn memory(name: &str) -> ConnectionHandle {
        ConnectionHandle::open(
            &ConnectionConfig::new(name, ":memory:"),
            Arc::new(TypeRegistry::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_open_in_memory() {
        let handle = memory("main");
        assert_eq!(handle.name(), "main");
        assert!(!handle.is_closed());
        handle.authenticate().unwrap();
    }

    #[test]
    fn test_unsupported_dialect() {
        let mut config = ConnectionConfig::new("pg", "db");
        config.options.dialect = "postgres".to_string();
        let err = ConnectionHandle::open(&config, Arc::new(TypeRegistry::new())).unwrap_err();
        assert!(matches!(err, SqliteError::UnsupportedDialect(d) if d == "postgres"));
    }

    #[test]
    fn test_read_write_mode_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config =
            ConnectionConfig::new("rw", dir.path().join("absent.db").to_string_lossy());
        config.options.mode = OpenMode::ReadWrite;
        let err = ConnectionHandle::open(&config, Arc::new(TypeRegistry::new())).unwrap_err();
        assert!(matches!(err, SqliteError::Authentication { connection, .. } if connection == "rw"));
    }

    #[test]
    fn test_define_and_lookup_models() {
        let handle = memory("main");
        let model = ModelDefinition::new("testOne").with_column("id", ColumnSchema::primary_key());
        assert!(handle.define(model.clone()).unwrap().is_none());
        assert!(handle.define(model).unwrap().is_some());
        assert!(handle.has_model("testOne"));
        assert_eq!(handle.model_names(), vec!["testOne"]);
        assert!(handle.model("testThree").is_none());
    }

    #[test]
    fn test_close_is_idempotent() {
        let handle = memory("main");
        handle.define(ModelDefinition::new("m")).unwrap();
        handle.close().unwrap();
        handle.close().unwrap();
        assert!(handle.is_closed());
        assert!(handle.model_names().is_empty());
        assert!(matches!(handle.authenticate(), Err(SqliteError::Closed(_))));
        assert!(matches!(
            handle.define(ModelDefinition::new("m")),
            Err(SqliteError::Closed(_))
        ));
    }

    #[test]
    fn test_table_listing() {
        let handle = memory("main");
        handle
            .execute_batch("CREATE TABLE b (id INTEGER); CREATE TABLE a (id INTEGER);")
            .unwrap();
        assert_eq!(handle.table_names().unwrap(), vec!["a", "b"]);
        assert!(handle.table_exists("a").unwrap());
        assert!(!handle.table_exists("c").unwrap());
    }
}

//! Startup and teardown of every configured connection.
//!
//! [`DatabaseComponent`] resolves the configuration, then bootstraps each
//! connection in table order: connections with a setup directory are
//! opened, get their models registered, and optionally have pending
//! migrations applied. Connections without a setup directory stay closed
//! until first requested.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use dbstrap_core::{DataType, MigrationUnit, TypeRegistry};
use dbstrap_setup::{CONFIG_NAMESPACE, ConfigSource, ConnectionConfig, ResolvedConfig, SetupDir};
use dbstrap_sqlite::{
    ConnectionHandle, MigrationReport, MigrationRunner, MigrationStatus, apply_migrations,
    load_models,
};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, Result, StateError};
use crate::pool::ConnectionPool;

/// Lifecycle phase of a [`DatabaseComponent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unstarted,
    Initializing,
    Ready,
    TearingDown,
}

/// Owns the connection pool and drives bootstrap for one configuration.
///
/// # Examples
///
/// ```no_run
/// use dbstrap::{ConfigSource, DatabaseComponent};
///
/// let component = DatabaseComponent::new(ConfigSource::load("config/app.yaml")?);
/// component.init()?;
///
/// let handle = component.get_connection("main")?;
/// println!("models: {:?}", handle.model_names());
///
/// component.dinit()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct DatabaseComponent {
    source: ConfigSource,
    namespace: String,
    types: Arc<TypeRegistry>,
    phase: Mutex<Phase>,
    config: RwLock<Option<Arc<ResolvedConfig>>>,
    guards: Mutex<HashSet<String>>,
    pool: ConnectionPool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DatabaseComponent {
    /// Creates a component reading the `dbstrap` namespace of `source`.
    pub fn new(source: ConfigSource) -> Self {
        Self {
            source,
            namespace: CONFIG_NAMESPACE.to_string(),
            types: Arc::new(TypeRegistry::new()),
            phase: Mutex::new(Phase::Unstarted),
            config: RwLock::new(None),
            guards: Mutex::new(HashSet::new()),
            pool: ConnectionPool::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Replaces the type namespace used by every connection.
    pub fn with_types(mut self, types: TypeRegistry) -> Self {
        self.types = Arc::new(types);
        self
    }

    /// Adds a custom column type. Only affects connections opened later,
    /// so register types before [`init`](Self::init).
    pub fn register_type(&mut self, data_type: DataType) -> Option<DataType> {
        Arc::make_mut(&mut self.types).register(data_type)
    }

    /// The type namespace handed to model and migration descriptors.
    pub fn lib(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn phase(&self) -> Phase {
        *lock(&self.phase)
    }

    /// Returns `true` once `init` has started bootstrapping `name`.
    pub fn is_bootstrapped(&self, name: &str) -> bool {
        lock(&self.guards).contains(name)
    }

    /// Bootstraps every configured connection.
    ///
    /// On failure every handle opened so far is closed and the component
    /// returns to [`Phase::Unstarted`], so `init` may be called again.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::AlreadyInitialized`] unless the component is
    /// unstarted, or the first error raised while bootstrapping.
    pub fn init(&self) -> Result<()> {
        {
            let mut phase = lock(&self.phase);
            if *phase != Phase::Unstarted {
                return Err(StateError::AlreadyInitialized.into());
            }
            *phase = Phase::Initializing;
        }

        match self.bootstrap() {
            Ok(count) => {
                *lock(&self.phase) = Phase::Ready;
                info!(connections = count, "bootstrap finished");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "bootstrap failed; rolling back");
                if let Err(close_err) = self.pool.close_all() {
                    warn!(error = %close_err, "failed to close connection during rollback");
                }
                self.reset();
                *lock(&self.phase) = Phase::Unstarted;
                Err(err)
            }
        }
    }

    /// Resolves the configuration without bootstrapping anything.
    pub fn resolved_config(&self) -> Result<ResolvedConfig> {
        let resolved = ResolvedConfig::from_source(&self.source, &self.namespace);
        resolved.check()?;
        Ok(resolved)
    }

    fn bootstrap(&self) -> Result<usize> {
        let resolved = Arc::new(self.resolved_config()?);

        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&resolved));
        self.pool.attach(Arc::clone(&resolved), Arc::clone(&self.types));

        let names = resolved.names();
        for name in &names {
            if !lock(&self.guards).insert(name.clone()) {
                warn!(connection = %name, "connection already bootstrapped; skipping");
                continue;
            }
            self.bootstrap_connection(&resolved, name)?;
        }
        Ok(names.len())
    }

    fn bootstrap_connection(&self, resolved: &ResolvedConfig, name: &str) -> Result<()> {
        let config = resolved
            .connection(name)?
            .ok_or_else(|| ConfigError::ConnectionNotFound(name.to_string()))?;
        let Some(setup_dir) = &config.setup_dir else {
            debug!(connection = %name, "no setup directory; connection opens on demand");
            return Ok(());
        };

        let handle = self.pool.get(name)?;
        load_models(setup_dir, &handle)?;
        if config.apply_migrations {
            let report = apply_migrations(setup_dir, &handle)?;
            debug!(connection = %name, applied = report.applied.len(), "startup migrations done");
        }
        info!(connection = %name, "connection bootstrapped");
        Ok(())
    }

    fn reset(&self) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = None;
        lock(&self.guards).clear();
        self.pool.detach();
    }

    /// Closes every pooled connection and forgets the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::AlreadyDeinitialized`] unless the component is
    /// ready. A close failure is returned after teardown completes; the
    /// component is unstarted either way.
    pub fn dinit(&self) -> Result<()> {
        {
            let mut phase = lock(&self.phase);
            if *phase != Phase::Ready {
                return Err(StateError::AlreadyDeinitialized.into());
            }
            *phase = Phase::TearingDown;
        }

        self.reset();
        let closed = self.pool.close_all();
        *lock(&self.phase) = Phase::Unstarted;
        info!("teardown finished");
        closed
    }

    /// Returns the shared handle for `name`, opening it on first use.
    pub fn get_connection(&self, name: &str) -> Result<Arc<ConnectionHandle>> {
        self.pool.get(name)
    }

    /// The pool of open handles.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    fn resolved(&self) -> Result<Arc<ResolvedConfig>> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| StateError::NotInitialized.into())
    }

    /// Normalized settings of one configured connection.
    pub fn connection_config(&self, name: &str) -> Result<ConnectionConfig> {
        Ok(self
            .resolved()?
            .connection(name)?
            .ok_or_else(|| ConfigError::ConnectionNotFound(name.to_string()))?)
    }

    /// Names of all configured connections, in table order.
    pub fn connection_names(&self) -> Result<Vec<String>> {
        Ok(self.resolved()?.names())
    }

    fn setup_dir(&self, config: &ConnectionConfig) -> Result<PathBuf> {
        config
            .setup_dir
            .clone()
            .ok_or_else(|| ConfigError::MissingSetupDir(config.name.clone()).into())
    }

    fn units(&self, setup_dir: &Path) -> Result<Vec<MigrationUnit>> {
        Ok(SetupDir::new(setup_dir).load_migrations(&self.types)?)
    }

    /// Applies pending migrations of a connection that does not migrate
    /// during `init`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AutoMigrating`] when the connection has
    /// `applyMigrations: true` and [`ConfigError::MissingSetupDir`] when it
    /// has no setup directory.
    pub fn apply_migrations(&self, name: &str) -> Result<MigrationReport> {
        let config = self.connection_config(name)?;
        if config.apply_migrations {
            return Err(ConfigError::AutoMigrating(name.to_string()).into());
        }
        let setup_dir = self.setup_dir(&config)?;
        let handle = self.pool.get(name)?;
        let report = apply_migrations(&setup_dir, &handle)?;
        info!(connection = %name, applied = report.applied.len(), "manual migration run finished");
        Ok(report)
    }

    /// Ledger state of a connection compared with its migrations directory.
    pub fn migration_status(&self, name: &str) -> Result<MigrationStatus> {
        let config = self.connection_config(name)?;
        let units = self.units(&self.setup_dir(&config)?)?;
        let handle = self.pool.get(name)?;
        Ok(MigrationRunner::new(&handle).status(&units)?)
    }

    /// Reverts the most recently applied migration of a connection.
    pub fn undo_migration(&self, name: &str) -> Result<Option<String>> {
        let config = self.connection_config(name)?;
        let units = self.units(&self.setup_dir(&config)?)?;
        let handle = self.pool.get(name)?;
        Ok(MigrationRunner::new(&handle).undo_last(&units)?)
    }
}

impl std::fmt::Debug for DatabaseComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseComponent")
            .field("namespace", &self.namespace)
            .field("phase", &self.phase())
            .field("connections", &self.pool.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;

    fn component(connections: serde_json::Value) -> DatabaseComponent {
        DatabaseComponent::new(ConfigSource::from_value(json!({
            "dbstrap": { "connections": connections }
        })))
    }

    #[test]
    fn test_phases() {
        let component = component(json!({ "main": { "database": ":memory:" } }));
        assert_eq!(component.phase(), Phase::Unstarted);
        component.init().unwrap();
        assert_eq!(component.phase(), Phase::Ready);
        assert!(component.is_bootstrapped("main"));
        component.dinit().unwrap();
        assert_eq!(component.phase(), Phase::Unstarted);
        assert!(!component.is_bootstrapped("main"));
    }

    #[test]
    fn test_double_init_and_dinit() {
        let component = component(json!({}));
        assert!(matches!(
            component.dinit(),
            Err(Error::State(StateError::AlreadyDeinitialized))
        ));
        component.init().unwrap();
        assert!(matches!(
            component.init(),
            Err(Error::State(StateError::AlreadyInitialized))
        ));
    }

    #[test]
    fn test_connections_without_setup_dir_stay_closed() {
        let component = component(json!({ "lazy": { "database": ":memory:" } }));
        component.init().unwrap();
        assert!(component.pool().is_empty());
        component.get_connection("lazy").unwrap();
        assert!(component.pool().contains("lazy"));
    }

    #[test]
    fn test_malformed_table_fails_init() {
        let component = component(json!(["not", "a", "table"]));
        assert!(matches!(
            component.init(),
            Err(Error::Config(ConfigError::Malformed(_)))
        ));
        assert_eq!(component.phase(), Phase::Unstarted);
    }

    #[test]
    fn test_register_type_before_init() {
        let mut component = component(json!({}));
        assert!(!component.lib().contains("GEOMETRY"));
        component.register_type(DataType::new("GEOMETRY", "BLOB"));
        assert!(component.lib().contains("GEOMETRY"));
    }

    #[test]
    fn test_manual_migration_needs_setup_dir() {
        let component = component(json!({ "main": { "database": ":memory:" } }));
        component.init().unwrap();
        assert!(matches!(
            component.apply_migrations("main"),
            Err(Error::Config(ConfigError::MissingSetupDir(_)))
        ));
    }
}

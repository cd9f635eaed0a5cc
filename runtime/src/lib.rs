//! Connection lifecycle and bootstrap for named database connections.
//!
//! A [`DatabaseComponent`] reads the `dbstrap` namespace of a configuration
//! source, opens each connection that declares a setup directory, registers
//! the models found there, and applies pending migrations when asked to.
//! Handles are shared as `Arc<ConnectionHandle>` and live until
//! [`DatabaseComponent::dinit`].
//!
//! # Configuration
//!
//! ```yaml
//! dbstrap:
//!   connections:
//!     main:
//!       database: data/app.db
//!       setupDir: ./setup
//!       applyMigrations: true
//!     scratch:
//!       database: ":memory:"
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use dbstrap::{ConfigSource, DataType, DatabaseComponent};
//!
//! let mut component = DatabaseComponent::new(ConfigSource::load("config.yaml")?);
//! component.register_type(DataType::new("GEOMETRY", "BLOB"));
//! component.init()?;
//!
//! let main = component.get_connection("main")?;
//! assert!(main.has_model("testOne"));
//!
//! component.dinit()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod bootstrap;
mod error;
mod pool;

pub use bootstrap::{DatabaseComponent, Phase};
pub use error::{ConfigError, Error, Result, StateError};
pub use pool::ConnectionPool;

pub use dbstrap_core::{DataType, ModelDefinition, TypeRegistry};
pub use dbstrap_setup::{
    CONFIG_ENV_VAR, CONFIG_NAMESPACE, ConfigSource, ConnectionConfig, ResolvedConfig,
};
pub use dbstrap_sqlite::{
    ConnectionHandle, LEDGER_TABLE, MigrationRecord, MigrationReport, MigrationStatus,
};

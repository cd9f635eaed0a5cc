//! Configuration resolution and setup-directory discovery for dbstrap.
//!
//! This crate turns host-supplied configuration into normalized connection
//! settings and reads the declarative contents of a connection's setup
//! directory.
//!
//! # Quick start
//!
//! ```no_run
//! use dbstrap_core::TypeRegistry;
//! use dbstrap_setup::{ConfigSource, ResolvedConfig, SetupDir, CONFIG_NAMESPACE};
//!
//! let source = ConfigSource::load("config/app.yaml").unwrap();
//! let resolved = ResolvedConfig::from_source(&source, CONFIG_NAMESPACE);
//!
//! for name in resolved.names() {
//!     let config = resolved.connection(&name).unwrap().unwrap();
//!     if let Some(dir) = &config.setup_dir {
//!         let models = SetupDir::new(dir).load_models(&TypeRegistry::new()).unwrap();
//!         println!("{name}: {} model(s)", models.len());
//!     }
//! }
//! ```

mod config;
mod error;
mod loader;

pub use config::{
    CONFIG_ENV_VAR, CONFIG_NAMESPACE, ConfigSource, ConnectionConfig, DEFAULT_DIALECT,
    DriverOptions, OpenMode, ResolvedConfig, merge, resolve,
};
pub use error::{Result, SetupError};
pub use loader::{
    DescriptorFormat, MIGRATIONS_DIR, MODELS_DIR, SetupDir, checksum, load_migration_file,
    load_model_file, model_name,
};

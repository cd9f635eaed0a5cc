//! Connection configuration resolution.
//!
//! A host hands over a free-form configuration tree (usually read from a
//! YAML or JSON file by [`ConfigSource`]). [`resolve`] merges it over the
//! built-in defaults and returns a [`ResolvedConfig`]; typed
//! [`ConnectionConfig`] values are only produced on demand, so shape errors
//! surface in whichever component asks for the connection.
//!
//! # Example YAML
//!
//! ```yaml
//! dbstrap:
//!   connections:
//!     main:
//!       database: ./data/main.db
//!       options:
//!         busyTimeoutMs: 2000
//!       setupDir: ./setup/main
//!       applyMigrations: true
//!     reporting:
//!       database: ./data/reporting.db
//!       options:
//!         mode: ro
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Result, SetupError};

/// Namespace key the component reads from a [`ConfigSource`].
pub const CONFIG_NAMESPACE: &str = "dbstrap";

/// Environment variable naming a configuration file.
pub const CONFIG_ENV_VAR: &str = "DBSTRAP_CONFIG";

/// Dialect used when a connection does not name one.
pub const DEFAULT_DIALECT: &str = "sqlite";

fn default_config() -> Value {
    json!({ "connections": {} })
}

fn default_connection() -> Value {
    json!({
        "database": "",
        "username": "",
        "password": "",
        "options": {
            "host": "localhost",
            "port": null,
            "dialect": DEFAULT_DIALECT,
            "logging": false,
            "mode": "rwc",
            "busyTimeoutMs": 5000
        },
        "setupDir": null,
        "applyMigrations": false
    })
}

/// How the driver opens the database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenMode {
    /// Read-write, creating the file if missing.
    #[default]
    #[serde(rename = "rwc")]
    ReadWriteCreate,
    /// Read-write; the file must already exist.
    #[serde(rename = "rw")]
    ReadWrite,
    /// Read-only; the file must already exist.
    #[serde(rename = "ro")]
    ReadOnly,
}

/// Driver options for one connection.
///
/// Keys the driver does not know are kept in [`extra`](Self::extra).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverOptions {
    pub host: String,
    pub port: Option<u16>,
    pub dialect: String,
    /// Log every statement the handle executes at debug level.
    pub logging: bool,
    pub mode: OpenMode,
    pub busy_timeout_ms: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            dialect: DEFAULT_DIALECT.to_string(),
            logging: false,
            mode: OpenMode::default(),
            busy_timeout_ms: 5000,
            extra: Map::new(),
        }
    }
}

/// Normalized configuration of one named connection.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    #[serde(skip)]
    pub name: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub options: DriverOptions,
    pub setup_dir: Option<PathBuf>,
    pub apply_migrations: bool,
}

impl ConnectionConfig {
    /// Creates a configuration with default options for `database`.
    pub fn new(name: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database: database.into(),
            username: None,
            password: None,
            options: DriverOptions::default(),
            setup_dir: None,
            apply_migrations: false,
        }
    }

    pub fn with_setup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.setup_dir = Some(dir.into());
        self
    }

    pub fn with_apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }

    /// Returns `true` for databases that live only in memory.
    pub fn is_in_memory(&self) -> bool {
        self.database == ":memory:"
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("name", &self.name)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("options", &self.options)
            .field("setup_dir", &self.setup_dir)
            .field("apply_migrations", &self.apply_migrations)
            .finish()
    }
}

/// A configuration tree from a file or an in-memory value.
///
/// Keys are addressed with `:`-separated paths, e.g. `dbstrap:connections`.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    root: Value,
    origin: Option<PathBuf>,
}

impl ConfigSource {
    /// Wraps an in-memory configuration tree.
    pub fn from_value(root: Value) -> Self {
        Self { root, origin: None }
    }

    /// Loads a configuration file.
    ///
    /// `.json` files are parsed as JSON; everything else as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::IoError`] if the file cannot be read, or a
    /// JSON/YAML error if parsing fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let root = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&raw)?,
            _ => serde_yaml::from_str(&raw)?,
        };
        tracing::debug!(path = %path.display(), "loaded configuration source");
        Ok(Self {
            root,
            origin: Some(path.to_path_buf()),
        })
    }

    /// Returns the value at a `:`-separated key path.
    pub fn get(&self, key: &str) -> Option<&Value> {
        key.split(':')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.root, |node, segment| node.get(segment))
    }

    /// File this source was loaded from, if any.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// Directory relative setup paths are resolved against.
    pub fn base_dir(&self) -> Option<&Path> {
        self.origin.as_deref().and_then(Path::parent)
    }
}

/// Merges `overlay` into `base`.
///
/// Objects merge key by key, recursively; any other overlay value replaces
/// the base value. `null` overlays are ignored at the top level only, so an
/// explicit `setupDir: null` still overrides a default.
pub fn merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    merge_value(base, overlay);
}

fn merge_value(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Output of [`resolve`]: the merged tree plus per-connection defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    root: Value,
    base_dir: Option<PathBuf>,
}

/// Merges a raw configuration tree over the built-in defaults.
///
/// Never fails: malformed shapes are kept and reported by
/// [`ResolvedConfig::check`] or [`ResolvedConfig::connection`].
///
/// # Examples
///
/// ```
/// use dbstrap_setup::resolve;
/// use serde_json::json;
///
/// let resolved = resolve(&json!({
///     "connections": {
///         "main": { "database": ":memory:", "options": { "logging": true } }
///     }
/// }));
///
/// let main = resolved.connection("main").unwrap().unwrap();
/// assert!(main.options.logging);
/// assert_eq!(main.options.dialect, "sqlite");
/// assert!(!main.apply_migrations);
/// assert!(resolved.connection("missing").unwrap().is_none());
/// ```
pub fn resolve(raw: &Value) -> ResolvedConfig {
    let mut root = default_config();
    merge(&mut root, raw);

    if let Some(Value::Object(connections)) = root.get_mut("connections") {
        for (_, entry) in connections.iter_mut() {
            if entry.is_object() {
                let mut merged = default_connection();
                merge(&mut merged, entry);
                *entry = merged;
            }
        }
    }

    ResolvedConfig {
        root,
        base_dir: None,
    }
}

impl ResolvedConfig {
    /// Resolves the namespace of a [`ConfigSource`], anchoring relative
    /// setup directories at the source file's directory.
    pub fn from_source(source: &ConfigSource, namespace: &str) -> Self {
        let raw = source.get(namespace).cloned().unwrap_or(Value::Null);
        let mut resolved = resolve(&raw);
        resolved.base_dir = source.base_dir().map(Path::to_path_buf);
        resolved
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// The merged configuration tree.
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    fn table(&self) -> Result<&Map<String, Value>> {
        let Value::Object(root) = &self.root else {
            return Err(SetupError::MalformedConfig {
                path: "<root>".to_string(),
                reason: "expected an object".to_string(),
            });
        };
        match root.get("connections") {
            Some(Value::Object(table)) => Ok(table),
            _ => Err(SetupError::MalformedConfig {
                path: "connections".to_string(),
                reason: "expected an object keyed by connection name".to_string(),
            }),
        }
    }

    /// Verifies the top-level shape without normalizing any connection.
    pub fn check(&self) -> Result<()> {
        self.table().map(|_| ())
    }

    /// Connection names in table order. Empty when the table is malformed.
    pub fn names(&self) -> Vec<String> {
        self.table()
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table().is_ok_and(|table| table.contains_key(name))
    }

    /// Normalizes one connection entry.
    ///
    /// Returns `Ok(None)` when the name is not configured. Relative
    /// `setupDir` values are joined onto the base directory, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::MalformedConfig`] when the table or the entry
    /// does not have the expected shape, or when the entry names no
    /// database.
    pub fn connection(&self, name: &str) -> Result<Option<ConnectionConfig>> {
        let Some(entry) = self.table()?.get(name) else {
            return Ok(None);
        };

        let mut config: ConnectionConfig =
            serde_json::from_value(entry.clone()).map_err(|err| SetupError::MalformedConfig {
                path: format!("connections:{name}"),
                reason: err.to_string(),
            })?;
        config.name = name.to_string();
        if config.database.trim().is_empty() {
            return Err(SetupError::MalformedConfig {
                path: format!("connections:{name}:database"),
                reason: "database is required".to_string(),
            });
        }

        if let (Some(dir), Some(base)) = (&config.setup_dir, &self.base_dir) {
            if dir.is_relative() {
                config.setup_dir = Some(base.join(dir));
            }
        }

        Ok(Some(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        json!({
            "connections": {
                "mysql": {
                    "database": "d",
                    "username": "u",
                    "password": "p",
                    "options": { "host": "h", "port": 3306 },
                    "setupDir": "./migrations-and-models",
                    "applyMigrations": true
                },
                "plain": { "database": ":memory:" }
            }
        })
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let resolved = resolve(&sample());
        let plain = resolved.connection("plain").unwrap().unwrap();
        assert_eq!(plain.name, "plain");
        assert!(plain.is_in_memory());
        assert_eq!(plain.username.as_deref(), Some(""));
        assert_eq!(plain.options, DriverOptions::default());
        assert_eq!(plain.setup_dir, None);
        assert!(!plain.apply_migrations);
    }

    #[test]
    fn test_explicit_values_win_and_nested_defaults_survive() {
        let resolved = resolve(&sample());
        let mysql = resolved.connection("mysql").unwrap().unwrap();
        assert_eq!(mysql.database, "d");
        assert_eq!(mysql.password.as_deref(), Some("p"));
        assert_eq!(mysql.options.host, "h");
        assert_eq!(mysql.options.port, Some(3306));
        // dialect was not given, so the default survives the nested merge
        assert_eq!(mysql.options.dialect, "sqlite");
        assert_eq!(
            mysql.setup_dir.as_deref(),
            Some(Path::new("./migrations-and-models"))
        );
        assert!(mysql.apply_migrations);
    }

    #[test]
    fn test_names_keep_table_order() {
        let resolved = resolve(&json!({
            "connections": { "zeta": {}, "alpha": {}, "mid": {} }
        }));
        assert_eq!(resolved.names(), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_null_and_missing_raw_config() {
        for raw in [Value::Null, json!({})] {
            let resolved = resolve(&raw);
            assert!(resolved.check().is_ok());
            assert!(resolved.names().is_empty());
            assert_eq!(resolved.as_value(), &json!({ "connections": {} }));
        }
    }

    #[test]
    fn test_malformed_shapes_are_deferred() {
        let resolved = resolve(&json!({ "connections": "nope" }));
        assert!(resolved.names().is_empty());
        assert!(matches!(
            resolved.check(),
            Err(SetupError::MalformedConfig { ref path, .. }) if path == "connections"
        ));
        assert!(resolved.connection("any").is_err());

        let resolved = resolve(&json!({ "connections": { "bad": 42 } }));
        assert!(resolved.check().is_ok());
        assert_eq!(resolved.names(), vec!["bad"]);
        assert!(matches!(
            resolved.connection("bad"),
            Err(SetupError::MalformedConfig { ref path, .. }) if path == "connections:bad"
        ));
    }

    #[test]
    fn test_wrong_field_type_is_malformed() {
        let resolved = resolve(&json!({
            "connections": { "x": { "applyMigrations": "yes" } }
        }));
        assert!(matches!(
            resolved.connection("x"),
            Err(SetupError::MalformedConfig { .. })
        ));
    }

    #[test]
    fn test_missing_database_is_malformed() {
        let resolved = resolve(&json!({
            "connections": {
                "omitted": { "setupDir": "./setup" },
                "blank": { "database": "  " }
            }
        }));
        for name in ["omitted", "blank"] {
            assert!(matches!(
                resolved.connection(name),
                Err(SetupError::MalformedConfig { ref path, .. })
                    if *path == format!("connections:{name}:database")
            ));
        }
    }

    #[test]
    fn test_unknown_driver_options_kept() {
        let resolved = resolve(&json!({
            "connections": { "x": { "database": "x.db", "options": { "charset": "utf8mb4" } } }
        }));
        let x = resolved.connection("x").unwrap().unwrap();
        assert_eq!(x.options.extra.get("charset"), Some(&json!("utf8mb4")));
    }

    #[test]
    fn test_open_mode_parsing() {
        let resolved = resolve(&json!({
            "connections": { "x": { "database": "x.db", "options": { "mode": "ro" } } }
        }));
        let x = resolved.connection("x").unwrap().unwrap();
        assert_eq!(x.options.mode, OpenMode::ReadOnly);
    }

    #[test]
    fn test_relative_setup_dir_uses_base_dir() {
        let resolved = resolve(&sample()).with_base_dir("/srv/app");
        let mysql = resolved.connection("mysql").unwrap().unwrap();
        assert_eq!(
            mysql.setup_dir.unwrap(),
            Path::new("/srv/app").join("./migrations-and-models")
        );
    }

    #[test]
    fn test_source_namespace_lookup() {
        let source = ConfigSource::from_value(json!({
            "dbstrap": { "connections": { "main": { "database": "a.db" } } },
            "other": 1
        }));
        assert!(source.get("dbstrap:connections:main").is_some());
        assert!(source.get("dbstrap:connections:missing").is_none());
        assert_eq!(source.get("other"), Some(&json!(1)));

        let resolved = ResolvedConfig::from_source(&source, CONFIG_NAMESPACE);
        assert_eq!(resolved.names(), vec!["main"]);
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        std::fs::write(
            &path,
            "dbstrap:\n  connections:\n    main:\n      database: main.db\n      setupDir: setup\n",
        )
        .unwrap();

        let source = ConfigSource::load(&path).unwrap();
        assert_eq!(source.origin(), Some(path.as_path()));

        let resolved = ResolvedConfig::from_source(&source, CONFIG_NAMESPACE);
        let main = resolved.connection("main").unwrap().unwrap();
        assert_eq!(main.setup_dir.unwrap(), dir.path().join("setup"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let resolved = resolve(&sample());
        let mysql = resolved.connection("mysql").unwrap().unwrap();
        let debug = format!("{mysql:?}");
        assert!(debug.contains("***"));
        assert!(!debug.contains("\"p\""));
    }
}

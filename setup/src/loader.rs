//! Setup-directory discovery for models and migrations.
//!
//! A setup directory has two optional children:
//!
//! - `models/` — files named `<identifier>.model.<ext>`; anything else is
//!   ignored. The identifier (letters and digits, starting with a letter)
//!   becomes the model name.
//! - `migrations/` — one migration unit per file, applied in ascending
//!   file-name order. JSON and YAML files hold `{up, down}` step lists;
//!   `.sql` files hold raw SQL with an optional `-- down` section.
//!
//! Every descriptor is resolved against a [`TypeRegistry`] and validated
//! while loading, so a directory either loads completely or not at all.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use dbstrap_core::{
    MigrationScript, MigrationStep, MigrationUnit, ModelDefinition, ModelDescriptor,
    TypeRegistry, validate_model, validate_steps,
};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Result, SetupError};

/// Sub-directory holding model descriptors.
pub const MODELS_DIR: &str = "models";

/// Sub-directory holding migration units.
pub const MIGRATIONS_DIR: &str = "migrations";

static MODEL_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9]*)\.model\.([A-Za-z0-9]+)$").expect("valid model file regex")
});

/// Marker line splitting a `.sql` migration into up and down sections.
const SQL_DOWN_MARKER: &str = "-- down";

/// Returns the model name for a file name following the
/// `<identifier>.model.<ext>` convention.
///
/// # Examples
///
/// ```
/// use dbstrap_setup::model_name;
///
/// assert_eq!(model_name("testOne.model.json"), Some("testOne"));
/// assert_eq!(model_name("testThree.json"), None);
/// assert_eq!(model_name("1bad.model.json"), None);
/// ```
pub fn model_name(file_name: &str) -> Option<&str> {
    MODEL_FILE_RE
        .captures(file_name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Descriptor encodings the loader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFormat {
    Json,
    Yaml,
    Sql,
}

impl DescriptorFormat {
    /// Detects the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(Self::Json),
            Some("yaml" | "yml") => Some(Self::Yaml),
            Some("sql") => Some(Self::Sql),
            _ => None,
        }
    }

    fn parse<T: serde::de::DeserializeOwned>(self, file: &Path, raw: &str) -> Result<T> {
        let parsed = match self {
            Self::Json => serde_json::from_str(raw).map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::from_str(raw).map_err(|e| e.to_string()),
            Self::Sql => return Err(SetupError::UnsupportedFormat(file.to_path_buf())),
        };
        parsed.map_err(|reason| SetupError::InvalidDescriptor {
            file: file.to_path_buf(),
            reason,
        })
    }
}

/// A setup directory on disk.
///
/// # Examples
///
/// ```no_run
/// use dbstrap_core::TypeRegistry;
/// use dbstrap_setup::SetupDir;
///
/// let types = TypeRegistry::new();
/// let setup = SetupDir::new("./setup/main");
///
/// for model in setup.load_models(&types).unwrap() {
///     println!("model {} -> table {}", model.name, model.table_name());
/// }
/// for unit in setup.load_migrations(&types).unwrap() {
///     println!("migration {} ({} steps)", unit.name, unit.script.up.len());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SetupDir {
    root: PathBuf,
}

impl SetupDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join(MODELS_DIR)
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.root.join(MIGRATIONS_DIR)
    }

    /// Loads every model descriptor, in directory listing order.
    ///
    /// Files not matching the naming convention are skipped silently.
    ///
    /// # Errors
    ///
    /// Fails on the first file that cannot be read, parsed, or validated,
    /// or when two files yield the same model name. Nothing is returned for
    /// a partially valid directory.
    pub fn load_models(&self, types: &TypeRegistry) -> Result<Vec<ModelDefinition>> {
        let mut models = Vec::new();
        let mut seen = HashSet::new();

        for (path, file_name) in self.list(&self.models_dir())? {
            let Some(name) = model_name(&file_name) else {
                debug!(file = %file_name, "skipping non-model file");
                continue;
            };
            if !seen.insert(name.to_string()) {
                return Err(SetupError::DuplicateModel(name.to_string()));
            }
            models.push(load_model_file(&path, name, types)?);
        }

        Ok(models)
    }

    /// Loads every migration unit, sorted by file name.
    ///
    /// Hidden files and files with unknown extensions are skipped.
    pub fn load_migrations(&self, types: &TypeRegistry) -> Result<Vec<MigrationUnit>> {
        let mut units = Vec::new();

        for (path, file_name) in self.list(&self.migrations_dir())? {
            if DescriptorFormat::from_path(&path).is_none() {
                debug!(file = %file_name, "skipping file with unknown migration format");
                continue;
            }
            units.push(load_migration_file(&path, types)?);
        }

        units.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(units)
    }

    /// Lists regular, non-hidden files of a child directory.
    ///
    /// The setup root must exist; a missing child directory lists as empty.
    fn list(&self, dir: &Path) -> Result<Vec<(PathBuf, String)>> {
        if !self.root.is_dir() {
            return Err(SetupError::MissingSetupDir(self.root.clone()));
        }
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "setup sub-directory absent");
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(String::from)
            else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            files.push((path, file_name));
        }
        Ok(files)
    }
}

/// Loads one model descriptor and registers it under `name`.
///
/// # Errors
///
/// Returns [`SetupError::MissingSchema`] when the descriptor has no
/// `schema` field and [`SetupError::InvalidModel`] when validation fails.
pub fn load_model_file(path: &Path, name: &str, types: &TypeRegistry) -> Result<ModelDefinition> {
    let format =
        DescriptorFormat::from_path(path).ok_or_else(|| SetupError::UnsupportedFormat(path.to_path_buf()))?;
    let raw = std::fs::read_to_string(path)?;
    let descriptor: ModelDescriptor = format.parse(path, &raw)?;

    let schema = descriptor
        .schema
        .ok_or_else(|| SetupError::MissingSchema(path.to_path_buf()))?;
    let model = ModelDefinition {
        name: name.to_string(),
        schema,
        options: descriptor.options.unwrap_or_default(),
    };

    let errors = validate_model(&model, types);
    if !errors.is_empty() {
        return Err(SetupError::InvalidModel {
            file: path.to_path_buf(),
            errors,
        });
    }

    debug!(model = %model.name, file = %path.display(), "loaded model descriptor");
    Ok(model)
}

/// Loads one migration unit; its name is the file name.
pub fn load_migration_file(path: &Path, types: &TypeRegistry) -> Result<MigrationUnit> {
    let format =
        DescriptorFormat::from_path(path).ok_or_else(|| SetupError::UnsupportedFormat(path.to_path_buf()))?;
    let raw = std::fs::read_to_string(path)?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(String::from)
        .ok_or_else(|| SetupError::InvalidDescriptor {
            file: path.to_path_buf(),
            reason: "file name is not valid UTF-8".to_string(),
        })?;

    let script = match format {
        DescriptorFormat::Sql => parse_sql_script(&raw),
        _ => format.parse::<MigrationScript>(path, &raw)?,
    };

    let mut errors = validate_steps(&script.up, types);
    errors.extend(validate_steps(&script.down, types));
    if script.up.is_empty() {
        return Err(SetupError::InvalidDescriptor {
            file: path.to_path_buf(),
            reason: "migration has no up steps".to_string(),
        });
    }
    if !errors.is_empty() {
        return Err(SetupError::InvalidMigration {
            file: path.to_path_buf(),
            errors,
        });
    }

    debug!(migration = %name, steps = script.up.len(), "loaded migration unit");
    Ok(MigrationUnit {
        name,
        script,
        checksum: checksum(raw.as_bytes()),
    })
}

/// Splits raw SQL at a `-- down` marker line.
fn parse_sql_script(raw: &str) -> MigrationScript {
    let mut up = String::new();
    let mut down = String::new();
    let mut in_down = false;

    for line in raw.lines() {
        if line.trim().eq_ignore_ascii_case(SQL_DOWN_MARKER) {
            in_down = true;
            continue;
        }
        let target = if in_down { &mut down } else { &mut up };
        target.push_str(line);
        target.push('\n');
    }

    let step = |sql: String| -> Vec<MigrationStep> {
        if sql.trim().is_empty() {
            Vec::new()
        } else {
            vec![MigrationStep::Sql { sql }]
        }
    };

    MigrationScript {
        up: step(up),
        down: step(down),
    }
}

/// Hex SHA-256 digest of descriptor contents.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

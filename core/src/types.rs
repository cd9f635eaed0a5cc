//! Model and migration descriptor types.
//!
//! These are the declarative forms read from a setup directory: model
//! definitions registered on a connection handle, and migration units whose
//! steps are applied in file-name order. All types deserialize from JSON or
//! YAML with camelCase keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Column definition used by model schemas and `create_table` steps.
///
/// Deserializes from either the shorthand form (`"name": "STRING"`) or the
/// full object form:
///
/// ```
/// use dbstrap_core::ColumnSchema;
///
/// let short: ColumnSchema = serde_json::from_str(r#""BIGINT""#).unwrap();
/// assert_eq!(short.type_name, "BIGINT");
/// assert!(short.allow_null);
///
/// let full: ColumnSchema = serde_json::from_str(
///     r#"{"type": "INTEGER", "primaryKey": true, "autoIncrement": true}"#,
/// ).unwrap();
/// assert!(full.primary_key);
/// assert!(full.auto_increment);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawColumn")]
pub struct ColumnSchema {
    /// Declared type name, resolved against a
    /// [`TypeRegistry`](crate::TypeRegistry) (e.g. `STRING`, `STRING(64)`).
    #[serde(rename = "type")]
    pub type_name: String,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub allow_null: bool,
    pub unique: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
}

impl ColumnSchema {
    /// Creates a nullable column of the given type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            primary_key: false,
            auto_increment: false,
            allow_null: true,
            unique: false,
            default_value: None,
        }
    }

    /// Creates an auto-incrementing integer primary key column.
    pub fn primary_key() -> Self {
        Self {
            primary_key: true,
            auto_increment: true,
            allow_null: false,
            ..Self::new("INTEGER")
        }
    }

    pub fn not_null(mut self) -> Self {
        self.allow_null = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawColumn {
    Short(String),
    Full(FullColumn),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullColumn {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    primary_key: bool,
    #[serde(default)]
    auto_increment: bool,
    #[serde(default)]
    allow_null: Option<bool>,
    #[serde(default)]
    unique: bool,
    #[serde(default)]
    default_value: Option<serde_json::Value>,
}

impl From<RawColumn> for ColumnSchema {
    fn from(raw: RawColumn) -> Self {
        match raw {
            RawColumn::Short(type_name) => ColumnSchema::new(type_name),
            RawColumn::Full(full) => ColumnSchema {
                type_name: full.type_name,
                primary_key: full.primary_key,
                auto_increment: full.auto_increment,
                // Primary keys are implicitly NOT NULL unless stated otherwise.
                allow_null: full.allow_null.unwrap_or(!full.primary_key),
                unique: full.unique,
                default_value: full.default_value,
            },
        }
    }
}

/// Index over one or more columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSpec {
    /// Index name; derived from the table and fields when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(fields: &[&str]) -> Self {
        Self {
            name: None,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the index name, falling back to `<fields joined by _>`.
    pub fn effective_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.fields.join("_"))
    }
}

/// Optional per-model settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelOptions {
    /// Backing table name; defaults to the model name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    pub timestamps: bool,
    pub indexes: Vec<IndexSpec>,
}

/// A named entity registered on a connection handle.
///
/// The name comes from the descriptor file (`testOne.model.json` registers
/// `testOne`); the schema maps column names to their definitions.
///
/// # Examples
///
/// ```
/// use dbstrap_core::{ColumnSchema, IndexSpec, ModelDefinition};
///
/// let model = ModelDefinition::new("testOne")
///     .with_column("id", ColumnSchema::primary_key())
///     .with_column("name", ColumnSchema::new("STRING"))
///     .with_index(IndexSpec::new(&["name"]).named("by_name"));
///
/// assert_eq!(model.table_name(), "testOne");
/// assert_eq!(model.primary_key_columns(), vec!["id"]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub name: String,
    pub schema: BTreeMap<String, ColumnSchema>,
    #[serde(default)]
    pub options: ModelOptions,
}

impl ModelDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: BTreeMap::new(),
            options: ModelOptions::default(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, column: ColumnSchema) -> Self {
        self.schema.insert(name.into(), column);
        self
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.options.indexes.push(index);
        self
    }

    /// Returns the backing table name.
    pub fn table_name(&self) -> &str {
        self.options.table_name.as_deref().unwrap_or(&self.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.schema.get(name)
    }

    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.schema
            .iter()
            .filter(|(_, c)| c.primary_key)
            .map(|(n, _)| n.as_str())
            .collect()
    }
}

/// Contents of a model descriptor file.
///
/// `schema` is optional at the serde level so that a missing schema can be
/// reported as its own error rather than a generic parse failure.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelDescriptor {
    #[serde(default)]
    pub schema: Option<BTreeMap<String, ColumnSchema>>,
    #[serde(default)]
    pub options: Option<ModelOptions>,
}

/// One schema change inside a migration unit.
///
/// Serialized with an `op` tag:
///
/// ```
/// use dbstrap_core::MigrationStep;
///
/// let step: MigrationStep = serde_json::from_str(
///     r#"{"op": "drop_table", "table": "testOne"}"#,
/// ).unwrap();
/// assert_eq!(step, MigrationStep::DropTable { table: "testOne".into(), if_exists: false });
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum MigrationStep {
    CreateTable {
        table: String,
        columns: BTreeMap<String, ColumnSchema>,
        #[serde(default)]
        if_not_exists: bool,
    },
    DropTable {
        table: String,
        #[serde(default)]
        if_exists: bool,
    },
    RenameTable {
        from: String,
        to: String,
    },
    AddColumn {
        table: String,
        column: String,
        definition: ColumnSchema,
    },
    RemoveColumn {
        table: String,
        column: String,
    },
    AddIndex {
        table: String,
        index: IndexSpec,
    },
    RemoveIndex {
        table: String,
        name: String,
    },
    /// Raw SQL executed verbatim.
    Sql {
        sql: String,
    },
}

/// Contents of a JSON or YAML migration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationScript {
    pub up: Vec<MigrationStep>,
    #[serde(default)]
    pub down: Vec<MigrationStep>,
}

/// A discovered migration: its ledger name plus the steps to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationUnit {
    /// File name of the migration; also its ledger identifier and sort key.
    pub name: String,
    pub script: MigrationScript,
    /// Hex SHA-256 of the file contents.
    pub checksum: String,
}

impl MigrationUnit {
    pub fn new(name: impl Into<String>, script: MigrationScript) -> Self {
        Self {
            name: name.into(),
            script,
            checksum: String::new(),
        }
    }

    /// Returns `true` if this unit defines `down` steps.
    pub fn is_reversible(&self) -> bool {
        !self.script.down.is_empty()
    }
}

//! Error types for configuration and setup-directory loading.
//!
//! Covers reading configuration sources, deferred configuration shape
//! errors, and every way a model or migration descriptor can fail to load.

use std::path::PathBuf;

use dbstrap_core::ValidationError;
use thiserror::Error;

/// Errors that can occur while resolving configuration or loading descriptors.
#[derive(Debug, Error)]
pub enum SetupError {
    /// File I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing failure.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML parsing failure.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Configuration value has the wrong shape (e.g. a string where a
    /// connection object is expected).
    #[error("malformed configuration at '{path}': {reason}")]
    MalformedConfig { path: String, reason: String },

    /// Setup directory named by a connection does not exist.
    #[error("setup directory not found: {}", .0.display())]
    MissingSetupDir(PathBuf),

    /// Descriptor file extension is not one the loader understands.
    #[error("unsupported descriptor format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// Descriptor could not be parsed.
    #[error("invalid descriptor '{}': {reason}", .file.display())]
    InvalidDescriptor { file: PathBuf, reason: String },

    /// Model descriptor has no `schema` field.
    #[error("schema field required: {}", .0.display())]
    MissingSchema(PathBuf),

    /// Model descriptor failed structural validation.
    #[error("invalid model '{}': {}", .file.display(), join(.errors))]
    InvalidModel {
        file: PathBuf,
        errors: Vec<ValidationError>,
    },

    /// Migration descriptor failed structural validation.
    #[error("invalid migration '{}': {}", .file.display(), join(.errors))]
    InvalidMigration {
        file: PathBuf,
        errors: Vec<ValidationError>,
    },

    /// Two model files resolve to the same model name.
    #[error("duplicate model name: {0}")]
    DuplicateModel(String),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience alias for results with [`SetupError`].
pub type Result<T> = std::result::Result<T, SetupError>;

//! Error types for the migration pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, bad labels, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The schema manifest has no model with this label.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Keyset pagination needs a primary key.
    #[error("Model {0} has no primary key - keyset pagination requires one")]
    ModelHasNoPrimaryKey(String),

    /// An export filter fragment already carries its own WHERE keyword.
    #[error("Invalid SQL filter for {model}: fragment must not contain WHERE: {fragment}")]
    InvalidFilterFragment { model: String, fragment: String },

    /// A global pipeline needs a model that the exclusion list removes.
    #[error("Model {model} is required by global pipeline {pipeline} but is excluded from export")]
    RequiredModelExcluded { model: String, pipeline: String },

    /// A global pipeline touched a model it did not declare.
    #[error("Global pipeline {pipeline} accessed undeclared model {model}")]
    UndeclaredDependency { pipeline: String, model: String },

    /// No unique key is available to detect conflicts on import.
    #[error("Model {0} declares no unique key")]
    NoUniqueKey(String),

    /// Rows lack a column of the model's unique key.
    #[error("Rows for {model} are missing unique key field {field}")]
    MissingUniqueKeyField { model: String, field: String },

    /// One import batch failed and was rolled back.
    #[error("Batch write failed for {model} (batch {batch}): {message}")]
    BatchWrite {
        model: String,
        batch: usize,
        message: String,
    },

    /// A batch or global transformer failed.
    #[error("Transformer {transformer} failed for {model}: {message}")]
    Transformer {
        model: String,
        transformer: String,
        message: String,
    },

    /// The target database does not speak the MySQL dialect.
    #[error("Unsupported dialect '{0}': only mysql is supported")]
    UnsupportedDialect(String),

    /// Database connection or query error
    #[error("Database error: {0}")]
    Database(#[from] mysql_async::Error),

    /// Database error reported by a non-MySQL executor.
    #[error("Database error: {0}")]
    Query(String),

    /// A payload file does not have the expected shape.
    #[error("Invalid payload {path}: {message}")]
    InvalidPayload { path: PathBuf, message: String },

    /// Another writer holds the output location.
    #[error("Output {0} is locked by another run (remove the lock file if no run is active)")]
    OutputLocked(PathBuf),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Zip archive error
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Directory walk error
    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl MigrateError {
    /// Create a Transformer error
    pub fn transformer(
        model: impl Into<String>,
        transformer: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        MigrateError::Transformer {
            model: model.into(),
            transformer: transformer.into(),
            message: message.into(),
        }
    }

    /// Create an UndeclaredDependency error
    pub fn undeclared(pipeline: impl Into<String>, model: impl Into<String>) -> Self {
        MigrateError::UndeclaredDependency {
            pipeline: pipeline.into(),
            model: model.into(),
        }
    }

    /// Create an InvalidPayload error
    pub fn payload(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        MigrateError::InvalidPayload {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from the database rather than from the pipeline.
    pub fn is_database(&self) -> bool {
        matches!(self, MigrateError::Database(_) | MigrateError::Query(_))
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::OutputLocked(_) => 2,
            MigrateError::ModelNotFound(_)
            | MigrateError::ModelHasNoPrimaryKey(_)
            | MigrateError::InvalidFilterFragment { .. }
            | MigrateError::RequiredModelExcluded { .. }
            | MigrateError::UndeclaredDependency { .. }
            | MigrateError::NoUniqueKey(_)
            | MigrateError::MissingUniqueKeyField { .. }
            | MigrateError::UnsupportedDialect(_) => 3,
            MigrateError::Database(_) | MigrateError::Query(_) => 4,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\n  Caused by ({}): {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

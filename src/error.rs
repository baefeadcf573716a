//! Error types for the Cauldron store

use std::path::PathBuf;

use thiserror::Error;

use crate::ensure::ValidationError;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Cauldron store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("{0}")]
    SchemaMismatch(SchemaMismatch),

    #[error("Cannot read package manifest of {path}: {reason}")]
    ManifestRead { path: PathBuf, reason: String },

    #[error(
        "{version} is not a semver compliant version and therefore cannot be auto patch \
         incremented. Please set the new container version explicitly."
    )]
    VersionFormat { version: String },

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("{descriptor} does not specify a platform")]
    MissingPlatform { descriptor: String },

    #[error(
        "{descriptor} is not a complete native application descriptor, \
         in the form application:platform:version"
    )]
    IncompleteDescriptor { descriptor: String },

    #[error("{descriptor} descriptor does not exist in Cauldron")]
    DescriptorNotFound { descriptor: String },

    #[error("{}", format_validation(.0))]
    Validation(Vec<ValidationError>),

    #[error("Toolchain error: {0}")]
    Toolchain(String),

    #[error("Invalid store document: {0}")]
    InvalidDocument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Semver error: {0}")]
    Semver(#[from] semver::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl StoreError {
    /// Whether this error comes from the schema gate
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(self, StoreError::SchemaMismatch(_))
    }
}

/// Schema gate failures, each naming its remediation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaMismatch {
    #[error(
        "Cauldron schema version mismatch ({store} > {client}). \
         Upgrade this client to a version that supports this Cauldron schema."
    )]
    StoreTooNew { store: String, client: String },

    #[error(
        "Cauldron schema version mismatch ({store} < {client}). \
         Upgrade the Cauldron to the latest schema version, \
         or switch to an older client that supports it."
    )]
    StoreNeedsUpgrade { store: String, client: String },

    #[error(
        "This Cauldron requires client version {required}, but the running client is {client}. \
         Use a client version that satisfies the requirement or use a different Cauldron."
    )]
    RequiredClientVersion { required: String, client: String },
}

/// Misuse of the begin/commit/discard protocol
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionError {
    #[error("a transaction is already open on this store connection")]
    AlreadyOpen,

    #[error("no transaction is open on this store connection")]
    NotOpen,
}

fn format_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

//! Error types for MTC Core
//!
//! Errors are split by how far they propagate:
//! - Schema discovery failures abort the clone run
//! - Table, column, row and file failures are recorded and the run continues
//! - Orchestrator errors are what the caller sees as a failed clone

use crate::types::TenantId;
use std::path::PathBuf;

/// Failure reported by a SQL executor
#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    /// Statement rejected by the database
    #[error("statement failed: {message} [{sql}]")]
    Statement { sql: String, message: String },

    /// Result did not have the requested shape
    #[error("expected {expected} result, got {found}")]
    UnexpectedShape {
        expected: &'static str,
        found: &'static str,
    },

    /// Connection-level failure
    #[error("connection error: {0}")]
    Connection(String),
}

impl SqlError {
    /// Create statement error
    pub fn statement(sql: impl Into<String>, message: impl ToString) -> Self {
        Self::Statement {
            sql: sql.into(),
            message: message.to_string(),
        }
    }
}

/// Schema catalog query failed
///
/// Without a table list there is no consistent subset of the tenant to work
/// on, so this aborts the run.
#[derive(Debug, thiserror::Error)]
#[error("schema discovery failed for {target}: {source}")]
pub struct SchemaDiscoveryError {
    /// Prefix or table being inspected
    pub target: String,
    /// Underlying executor error
    #[source]
    pub source: SqlError,
}

impl SchemaDiscoveryError {
    /// Create discovery error for a prefix or table
    pub fn new(target: impl Into<String>, source: SqlError) -> Self {
        Self {
            target: target.into(),
            source,
        }
    }
}

/// Failure while cloning one table
#[derive(Debug, thiserror::Error)]
pub enum TableOperationError {
    /// Dropping the stale destination table failed
    #[error("drop of {table} failed: {source}")]
    Drop {
        table: String,
        #[source]
        source: SqlError,
    },

    /// Creating the destination table failed
    #[error("create of {table} like {from} failed: {source}")]
    Create {
        table: String,
        from: String,
        #[source]
        source: SqlError,
    },

    /// Copying rows failed
    #[error("row copy into {table} failed: {source}")]
    Copy {
        table: String,
        #[source]
        source: SqlError,
    },
}

impl TableOperationError {
    /// Destination table the failure refers to
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Drop { table, .. } | Self::Create { table, .. } | Self::Copy { table, .. } => {
                table
            }
        }
    }
}

/// Filesystem failure during asset copy
#[derive(Debug, thiserror::Error)]
pub enum FilesystemError {
    /// Directory listing failed
    #[error("cannot read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory creation failed
    #[error("cannot create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File copy failed
    #[error("cannot copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Metadata or permission change failed
    #[error("cannot update {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Path exists but is not a directory
    #[error("{0} exists and is not a directory")]
    NotADirectory(PathBuf),

    /// Directory exists but files cannot be created in it
    #[error("{0} is not writable")]
    NotWritable(PathBuf),
}

impl FilesystemError {
    /// Create directory-listing error for path
    pub fn read_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadDir {
            path: path.into(),
            source,
        }
    }

    /// Create directory-creation error for path
    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CreateDir {
            path: path.into(),
            source,
        }
    }

    /// Create metadata error for path
    pub fn metadata(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Metadata {
            path: path.into(),
            source,
        }
    }
}

/// Manifest column absent from the discovered table
///
/// Not a failure: the column is skipped and the pass continues.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, thiserror::Error)]
#[error("column {column} not found in {table}")]
pub struct ColumnNotFound {
    /// Logical table name
    pub table: String,
    /// Column name
    pub column: String,
}

/// Table set cloning errors
#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    /// Source table discovery failed
    #[error(transparent)]
    SchemaDiscovery(#[from] SchemaDiscoveryError),

    /// Source and destination share a prefix
    #[error("source and destination prefix are both '{0}'")]
    SamePrefix(String),

    /// Tenant has no usable prefix
    #[error("tenant {0} has an empty table prefix")]
    EmptyPrefix(TenantId),

    /// Refusing to drop the primary tenant's tables
    #[error("refusing to drop tables of primary tenant {0}")]
    PrimaryTenant(TenantId),
}

/// Reference rewrite errors
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    /// Destination table or column discovery failed
    #[error(transparent)]
    SchemaDiscovery(#[from] SchemaDiscoveryError),
}

/// Tenant option errors
#[derive(Debug, thiserror::Error)]
pub enum OptionError {
    /// Reading option failed
    #[error("cannot read option '{name}' of tenant {tenant}: {source}")]
    Read {
        tenant: TenantId,
        name: String,
        #[source]
        source: SqlError,
    },

    /// Writing option failed
    #[error("cannot write option '{name}' of tenant {tenant}: {source}")]
    Write {
        tenant: TenantId,
        name: String,
        #[source]
        source: SqlError,
    },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file unreadable
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or schema error
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// JSON syntax or schema error
    #[error("invalid document: {0}")]
    Json(#[from] serde_json::Error),

    /// Value out of range
    #[error("invalid configuration value: {0}")]
    Invalid(String),
}

/// Errors from external collaborators (provisioning, asset registration)
#[derive(Debug, thiserror::Error)]
#[error("{collaborator} failed: {message}")]
pub struct CollaboratorError {
    /// Which collaborator failed
    pub collaborator: &'static str,
    /// Human-readable message
    pub message: String,
}

impl CollaboratorError {
    /// Create collaborator error
    pub fn new(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            message: message.into(),
        }
    }
}

/// Errors that fail a whole clone run
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Table set cloning failed
    #[error("clone failed: {0}")]
    Clone(#[from] CloneError),

    /// Reference rewrite failed
    #[error("rewrite failed: {0}")]
    Rewrite(#[from] RewriteError),

    /// Setting baseline options failed
    #[error("option update failed: {0}")]
    Options(#[from] OptionError),

    /// Destination upload directory unusable
    #[error("asset copy failed: {0}")]
    Filesystem(#[from] FilesystemError),

    /// Provisioning or registration collaborator failed
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl OrchestratorError {
    /// Whether the destination may hold a partial clone
    ///
    /// Re-running the clone is safe in that case: every table is dropped and
    /// recreated.
    #[inline]
    #[must_use]
    pub fn leaves_partial_clone(&self) -> bool {
        !matches!(
            self,
            Self::Clone(CloneError::SamePrefix(_) | CloneError::EmptyPrefix(_))
                | Self::Collaborator(_)
        )
    }
}

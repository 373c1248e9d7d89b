//! MTC Core
//!
//! Clones one tenant of a shared multi-tenant database into another and
//! rewrites every stored reference to the old tenant's identity.
//!
//! # Core Concepts
//!
//! - [`TenantContext`]: prefix, URLs and upload directory of one tenant,
//!   passed explicitly to every operation
//! - [`TableSetCloner`]: drop, recreate and copy each tenant table
//! - [`ReferenceRewritePass`]: replaces upload URL, base URL and table prefix
//!   in every designated column, serialized payloads included
//! - [`SelectiveAssetCopier`]: mirrors the upload tree, copying only
//!   manifest files
//! - [`CloneOrchestrator`]: runs the steps above in order
//!
//! # Example
//!
//! ```rust,ignore
//! use mtc_core::prelude::*;
//!
//! let orchestrator = CloneOrchestrator::new(executor, CloneConfig::default());
//! let plan = ClonePlan::new(source, dest, "Bravo Store", "owner@bravo.test");
//! let outcome = orchestrator.run(&plan).await?;
//! println!("{} rows rewritten", outcome.rewrite.rows_updated());
//! ```

pub mod assets;
pub mod catalog;
pub mod clone;
pub mod config;
mod ddl;
pub mod error;
pub mod options;
pub mod orchestrator;
pub mod rewrite;
pub mod sql;
pub mod types;

pub use assets::{AssetDescriptor, AssetManifest, CopyReport, SelectiveAssetCopier};
pub use catalog::SchemaCatalog;
pub use clone::{CloneReport, ClonedTable, DropReport, TableSetCloner};
pub use config::{CloneConfig, ManifestMerge};
pub use error::*;
pub use options::OptionStore;
pub use orchestrator::{
    AssetPlan, AssetRef, AssetRegistrar, CloneOrchestrator, CloneOutcome, ClonePlan,
    OutcomeSummary, TenantProvisioner,
};
pub use rewrite::{ColumnReport, ReferenceRewritePass, RewriteInputs, RewritePlan, RewriteReport, RowRewriter};
pub use sql::{Dialect, QueryMode, QueryResult, Row, SqlExecutor, SqlValue, Statement};
pub use types::*;

/// Commonly used types
pub mod prelude {
    pub use crate::assets::{AssetDescriptor, AssetManifest, SelectiveAssetCopier};
    pub use crate::clone::TableSetCloner;
    pub use crate::config::{CloneConfig, ManifestMerge};
    pub use crate::error::{CloneError, OrchestratorError, RewriteError};
    pub use crate::orchestrator::{AssetPlan, CloneOrchestrator, ClonePlan};
    pub use crate::rewrite::{ReferenceRewritePass, RewriteInputs};
    pub use crate::sql::{Dialect, SqlExecutor};
    pub use crate::types::{BaselineOptions, SubstitutionMap, TenantContext, TenantId, TenantTableSet};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

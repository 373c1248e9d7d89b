//! Clone configuration
//!
//! Loaded from TOML; every section and field is optional.
//!
//! ```toml
//! [tables]
//! primary_tenant = 1
//! merge = "augment"
//!
//! [tables.manifest]
//! posts = ["post_content", "guid"]
//! woocommerce_order_items = ["order_item_name"]
//!
//! [clone]
//! table_concurrency = 4
//!
//! [assets]
//! dir_mode = 0o755
//! ```

use crate::error::ConfigError;
use crate::types::{TenantId, TenantTableSet};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How manifest columns combine with discovered columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestMerge {
    /// Manifest column list replaces the discovered list
    #[default]
    Override,
    /// Manifest columns are added to the discovered list
    Augment,
}

/// Table selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TablesConfig {
    /// Tenant whose tables are listed from the manifest instead of the catalog
    pub primary_tenant: TenantId,
    /// Core tables and their sensitive columns
    pub manifest: TenantTableSet,
    /// Logical name of the link manager table
    pub link_table: String,
    /// Option that enables the link manager
    pub link_option: String,
    /// Manifest merge mode
    pub merge: ManifestMerge,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            primary_tenant: TenantId(1),
            manifest: TenantTableSet::default_manifest(),
            link_table: "links".to_string(),
            link_option: "link_manager_enabled".to_string(),
            merge: ManifestMerge::Override,
        }
    }
}

/// Table cloning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneSection {
    /// Tables cloned at the same time
    pub table_concurrency: usize,
}

impl Default for CloneSection {
    fn default() -> Self {
        Self { table_concurrency: 1 }
    }
}

/// Reference rewriting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteSection {
    /// Columns rewritten at the same time
    pub column_concurrency: usize,
    /// Object classes decoded as records in addition to `stdClass`
    pub known_classes: Vec<String>,
}

impl Default for RewriteSection {
    fn default() -> Self {
        Self {
            column_concurrency: 1,
            known_classes: Vec::new(),
        }
    }
}

/// Asset copying
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsSection {
    /// Directory name never descended into
    pub exclude_dir: String,
    /// Mode for created directories (Unix only)
    pub dir_mode: u32,
}

impl Default for AssetsSection {
    fn default() -> Self {
        Self {
            exclude_dir: "sites".to_string(),
            dir_mode: 0o777,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneConfig {
    /// Table selection
    pub tables: TablesConfig,
    /// Table cloning
    pub clone: CloneSection,
    /// Reference rewriting
    pub rewrite: RewriteSection,
    /// Asset copying
    pub assets: AssetsSection,
}

impl CloneConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// Returns [`ConfigError`] on syntax errors or out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file is unreadable or invalid.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clone.table_concurrency == 0 {
            return Err(ConfigError::Invalid("clone.table_concurrency must be at least 1".into()));
        }
        if self.rewrite.column_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "rewrite.column_concurrency must be at least 1".into(),
            ));
        }
        if self.assets.dir_mode > 0o7777 {
            return Err(ConfigError::Invalid(format!(
                "assets.dir_mode {:o} is not a permission mode",
                self.assets.dir_mode
            )));
        }
        if self.tables.link_table.is_empty() {
            return Err(ConfigError::Invalid("tables.link_table must not be empty".into()));
        }
        if self.assets.exclude_dir.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "assets.exclude_dir '{}' must be a single name",
                self.assets.exclude_dir
            )));
        }
        Ok(())
    }

    /// With primary tenant
    #[inline]
    #[must_use]
    pub fn with_primary_tenant(mut self, tenant: TenantId) -> Self {
        self.tables.primary_tenant = tenant;
        self
    }

    /// With table manifest
    #[inline]
    #[must_use]
    pub fn with_manifest(mut self, manifest: TenantTableSet) -> Self {
        self.tables.manifest = manifest;
        self
    }

    /// With manifest merge mode
    #[inline]
    #[must_use]
    pub fn with_merge(mut self, merge: ManifestMerge) -> Self {
        self.tables.merge = merge;
        self
    }

    /// With table concurrency
    #[inline]
    #[must_use]
    pub fn with_table_concurrency(mut self, n: usize) -> Self {
        self.clone.table_concurrency = n.max(1);
        self
    }

    /// With column concurrency
    #[inline]
    #[must_use]
    pub fn with_column_concurrency(mut self, n: usize) -> Self {
        self.rewrite.column_concurrency = n.max(1);
        self
    }

    /// With additional known object classes
    #[must_use]
    pub fn with_known_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rewrite.known_classes.extend(classes.into_iter().map(Into::into));
        self
    }

    /// With asset directory exclusion
    #[inline]
    #[must_use]
    pub fn with_exclude_dir(mut self, name: impl Into<String>) -> Self {
        self.assets.exclude_dir = name.into();
        self
    }

    /// With directory mode
    #[inline]
    #[must_use]
    pub fn with_dir_mode(mut self, mode: u32) -> Self {
        self.assets.dir_mode = mode;
        self
    }
}

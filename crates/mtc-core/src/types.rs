//! Core types for MTC
//!
//! Defines the values threaded through a clone run:
//! - Tenant identity and storage context
//! - Table manifests (logical table → sensitive columns)
//! - The ordered substitution map
//! - Baseline identity options

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use ulid::Ulid;

/// Numeric tenant identifier assigned by the provisioning system
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub u64);

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one clone run (ULID for sortability in logs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything the engine needs to know about one tenant
///
/// Passed explicitly into every table and option operation; there is no
/// notion of a "current" tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    /// Tenant identifier
    pub id: TenantId,
    /// Table-name prefix (e.g. `wp_5_`)
    pub prefix: String,
    /// Base site URL
    pub base_url: String,
    /// Public URL of the upload directory
    pub upload_url: String,
    /// Filesystem path of the upload directory
    #[serde(default)]
    pub upload_dir: PathBuf,
}

impl TenantContext {
    /// Create context with empty URLs and upload directory
    #[must_use]
    pub fn new(id: TenantId, prefix: impl Into<String>) -> Self {
        Self {
            id,
            prefix: prefix.into(),
            base_url: String::new(),
            upload_url: String::new(),
            upload_dir: PathBuf::new(),
        }
    }

    /// With base URL
    #[inline]
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// With upload URL
    #[inline]
    #[must_use]
    pub fn with_upload_url(mut self, url: impl Into<String>) -> Self {
        self.upload_url = url.into();
        self
    }

    /// With upload directory
    #[inline]
    #[must_use]
    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }

    /// Physical name of a logical table
    #[inline]
    #[must_use]
    pub fn table(&self, logical: &str) -> String {
        format!("{}{logical}", self.prefix)
    }

    /// Logical name of a physical table, if it carries this tenant's prefix
    #[inline]
    #[must_use]
    pub fn logical<'t>(&self, table: &'t str) -> Option<&'t str> {
        table.strip_prefix(self.prefix.as_str())
    }
}

const DEFAULT_MANIFEST: [(&str, &[&str]); 10] = [
    ("terms", &[]),
    ("termmeta", &[]),
    ("term_taxonomy", &[]),
    ("term_relationships", &[]),
    ("commentmeta", &[]),
    ("comments", &[]),
    ("postmeta", &["meta_value"]),
    ("posts", &["post_content", "guid"]),
    ("links", &["link_url", "link_image"]),
    ("options", &["option_name", "option_value"]),
];

/// Logical table name → ordered sensitive columns
///
/// Keys never carry a tenant prefix.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantTableSet(IndexMap<String, Vec<String>>);

impl TenantTableSet {
    /// Create empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Core tables of a tenant and the columns known to embed URLs,
    /// serialized blobs or table prefixes
    #[must_use]
    pub fn default_manifest() -> Self {
        DEFAULT_MANIFEST
            .iter()
            .fold(Self::new(), |set, (table, columns)| {
                set.with_table(*table, columns.iter().copied())
            })
    }

    /// Add or replace a table entry
    #[must_use]
    pub fn with_table<I, S>(mut self, table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(table, columns.into_iter().map(Into::into).collect());
        self
    }

    /// Insert a table entry, returning the previous column list
    pub fn insert(&mut self, table: impl Into<String>, columns: Vec<String>) -> Option<Vec<String>> {
        self.0.insert(table.into(), columns)
    }

    /// Remove a table entry, keeping the order of the rest
    pub fn remove(&mut self, table: &str) -> Option<Vec<String>> {
        self.0.shift_remove(table)
    }

    /// Columns of a table
    #[inline]
    #[must_use]
    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.0.get(table).map(Vec::as_slice)
    }

    /// Mutable columns of a table
    #[inline]
    pub fn columns_mut(&mut self, table: &str) -> Option<&mut Vec<String>> {
        self.0.get_mut(table)
    }

    /// Whether the set contains a table
    #[inline]
    #[must_use]
    pub fn contains(&self, table: &str) -> bool {
        self.0.contains_key(table)
    }

    /// Logical table names in order
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Entries in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(t, c)| (t.as_str(), c.as_slice()))
    }

    /// Number of tables
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One literal replacement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    /// Text to find
    pub from: String,
    /// Replacement text
    pub to: String,
}

/// Ordered replacements applied to every rewritten value
///
/// URL entries always precede the prefix entry: a prefix such as `wp_` can
/// occur inside a URL path, and rewriting it first would leave URLs that no
/// longer match either the old or the new base.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SubstitutionMap(Vec<Substitution>);

impl SubstitutionMap {
    /// Build the map for cloning `source` into `dest`
    ///
    /// Order: upload URL, base URL, table prefix. Entries with an empty
    /// `from` or with `from == to` are dropped.
    #[must_use]
    pub fn for_tenants(source: &TenantContext, dest: &TenantContext) -> Self {
        let mut map = Self::default();
        map.push(&source.upload_url, &dest.upload_url);
        map.push(&source.base_url, &dest.base_url);
        map.push(&source.prefix, &dest.prefix);
        map
    }

    fn push(&mut self, from: &str, to: &str) {
        if from.is_empty() || from == to {
            return;
        }
        self.0.push(Substitution {
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    /// Entries in application order
    pub fn iter(&self) -> impl Iterator<Item = &Substitution> {
        self.0.iter()
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Identity options set on the destination before references are rewritten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineOptions {
    /// `siteurl`
    pub site_url: String,
    /// `home`
    pub home_url: String,
    /// `blogname`
    pub blog_name: String,
    /// `admin_email`
    pub admin_email: String,
}

impl BaselineOptions {
    /// Baseline with both URLs set to the tenant's base URL
    #[must_use]
    pub fn for_tenant(
        tenant: &TenantContext,
        blog_name: impl Into<String>,
        admin_email: impl Into<String>,
    ) -> Self {
        Self {
            site_url: tenant.base_url.clone(),
            home_url: tenant.base_url.clone(),
            blog_name: blog_name.into(),
            admin_email: admin_email.into(),
        }
    }

    /// Option name/value pairs in write order
    #[must_use]
    pub fn entries(&self) -> [(&'static str, &str); 4] {
        [
            ("siteurl", self.site_url.as_str()),
            ("home", self.home_url.as_str()),
            ("blogname", self.blog_name.as_str()),
            ("admin_email", self.admin_email.as_str()),
        ]
    }
}

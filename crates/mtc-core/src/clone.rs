//! Table set cloning
//!
//! Copies every table of a source tenant under the destination prefix:
//! drop the stale destination, recreate it with the source structure, copy
//! all rows. A table that fails is recorded and the others carry on.

use crate::catalog::SchemaCatalog;
use crate::config::{CloneConfig, TablesConfig};
use crate::ddl::create_table_like;
use crate::error::{CloneError, TableOperationError};
use crate::sql::SqlExecutor;
use crate::types::TenantContext;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One successfully cloned table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClonedTable {
    /// Source table name
    pub source: String,
    /// Destination table name
    pub dest: String,
    /// Rows copied
    pub rows: u64,
}

/// Result of cloning a table set
#[derive(Debug, Default)]
pub struct CloneReport {
    /// Prefix of the destination tables
    pub dest_prefix: String,
    /// Tables cloned, in source order
    pub tables: Vec<ClonedTable>,
    /// Tables that failed
    pub failures: Vec<TableOperationError>,
}

impl CloneReport {
    /// Whether every table was cloned
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Total rows copied
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

/// Result of dropping a tenant's tables
#[derive(Debug, Default)]
pub struct DropReport {
    /// Tables dropped
    pub dropped: Vec<String>,
    /// Tables that could not be dropped
    pub failures: Vec<TableOperationError>,
}

/// Clones the tables of one tenant into another
pub struct TableSetCloner {
    executor: Arc<dyn SqlExecutor>,
    catalog: SchemaCatalog,
    tables: TablesConfig,
    concurrency: usize,
}

impl std::fmt::Debug for TableSetCloner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSetCloner")
            .field("primary_tenant", &self.tables.primary_tenant)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl TableSetCloner {
    /// Create cloner
    #[must_use]
    pub fn new(executor: Arc<dyn SqlExecutor>, config: &CloneConfig) -> Self {
        Self {
            catalog: SchemaCatalog::new(Arc::clone(&executor)),
            executor,
            tables: config.tables.clone(),
            concurrency: config.clone.table_concurrency.max(1),
        }
    }

    /// Physical names of the tables to clone from `source`
    ///
    /// The primary tenant shares its prefix with network-wide tables, so its
    /// set comes from the manifest. Other tenants are listed from the catalog,
    /// minus any table that already carries the destination prefix.
    ///
    /// # Errors
    /// Returns [`CloneError::SchemaDiscovery`] if the catalog query fails.
    pub async fn source_tables(
        &self,
        source: &TenantContext,
        dest: &TenantContext,
    ) -> Result<Vec<String>, CloneError> {
        if source.id == self.tables.primary_tenant {
            return Ok(self.tables.manifest.tables().map(|t| source.table(t)).collect());
        }
        let tables = self.catalog.list_tables(&source.prefix).await?;
        Ok(tables
            .into_iter()
            .filter(|t| !t.starts_with(dest.prefix.as_str()))
            .collect())
    }

    /// Clone every table of `source` under the prefix of `dest`
    ///
    /// All table work has finished when this returns.
    ///
    /// # Errors
    /// Returns [`CloneError`] for unusable prefixes or a failed catalog query.
    /// Per-table failures are reported in [`CloneReport::failures`].
    pub async fn clone(
        &self,
        source: &TenantContext,
        dest: &TenantContext,
    ) -> Result<CloneReport, CloneError> {
        check_prefixes(source, dest)?;

        let pairs: Vec<(String, String)> = self
            .source_tables(source, dest)
            .await?
            .into_iter()
            .filter_map(|table| {
                let logical = source.logical(&table)?.to_string();
                Some((table, dest.table(&logical)))
            })
            .collect();

        info!(
            source = %source.prefix,
            dest = %dest.prefix,
            tables = pairs.len(),
            "Cloning table set"
        );

        let results: Vec<_> = stream::iter(pairs)
            .map(|(from, to)| async move { self.clone_table(&from, &to).await })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = CloneReport {
            dest_prefix: dest.prefix.clone(),
            ..CloneReport::default()
        };
        for result in results {
            match result {
                Ok(table) => report.tables.push(table),
                Err(e) => {
                    warn!(table = %e.table(), error = %e, "Table clone failed");
                    report.failures.push(e);
                }
            }
        }

        info!(
            dest = %dest.prefix,
            cloned = report.tables.len(),
            failed = report.failures.len(),
            rows = report.rows(),
            "Table set cloned"
        );
        Ok(report)
    }

    async fn clone_table(&self, source: &str, dest: &str) -> Result<ClonedTable, TableOperationError> {
        let dialect = self.executor.dialect();

        self.executor
            .execute(&dialect.drop_table(dest))
            .await
            .map_err(|source| TableOperationError::Drop {
                table: dest.to_string(),
                source,
            })?;

        create_table_like(self.executor.as_ref(), dest, source)
            .await
            .map_err(|e| TableOperationError::Create {
                table: dest.to_string(),
                from: source.to_string(),
                source: e,
            })?;

        let rows = self
            .executor
            .execute(&dialect.copy_rows(dest, source))
            .await
            .map_err(|source| TableOperationError::Copy {
                table: dest.to_string(),
                source,
            })?;

        debug!(table = %dest, from = %source, rows, "Table cloned");
        Ok(ClonedTable {
            source: source.to_string(),
            dest: dest.to_string(),
            rows,
        })
    }

    /// Drop every table carrying the prefix of `tenant`
    ///
    /// Cleanup for a deleted tenant. The primary tenant is refused: its
    /// prefix also covers network-wide tables.
    ///
    /// # Errors
    /// Returns [`CloneError`] for the primary tenant, an empty prefix or a
    /// failed catalog query.
    pub async fn drop_tenant(&self, tenant: &TenantContext) -> Result<DropReport, CloneError> {
        if tenant.id == self.tables.primary_tenant {
            return Err(CloneError::PrimaryTenant(tenant.id));
        }
        if tenant.prefix.is_empty() {
            return Err(CloneError::EmptyPrefix(tenant.id));
        }

        let dialect = self.executor.dialect();
        let mut report = DropReport::default();
        for table in self.catalog.list_tables(&tenant.prefix).await? {
            match self.executor.execute(&dialect.drop_table(&table)).await {
                Ok(_) => {
                    debug!(table = %table, "Table dropped");
                    report.dropped.push(table);
                }
                Err(source) => {
                    warn!(table = %table, error = %source, "Table drop failed");
                    report.failures.push(TableOperationError::Drop { table, source });
                }
            }
        }

        info!(tenant = %tenant.id, dropped = report.dropped.len(), "Tenant tables dropped");
        Ok(report)
    }
}

fn check_prefixes(source: &TenantContext, dest: &TenantContext) -> Result<(), CloneError> {
    if source.prefix.is_empty() {
        return Err(CloneError::EmptyPrefix(source.id));
    }
    if dest.prefix.is_empty() {
        return Err(CloneError::EmptyPrefix(dest.id));
    }
    if source.prefix == dest.prefix {
        return Err(CloneError::SamePrefix(dest.prefix.clone()));
    }
    Ok(())
}

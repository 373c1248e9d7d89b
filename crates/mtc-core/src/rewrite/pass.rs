//! Reference rewrite over a freshly cloned table set

use super::row::{ColumnReport, RowRewriter};
use crate::catalog::SchemaCatalog;
use crate::config::{CloneConfig, ManifestMerge, TablesConfig};
use crate::error::{ColumnNotFound, RewriteError};
use crate::sql::SqlExecutor;
use crate::types::{SubstitutionMap, TenantContext, TenantTableSet};
use futures::stream::{self, StreamExt};
use mtc_serial::{ClassResolver, ValueRewriter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a rewrite pass needs to know about the clone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteInputs {
    /// Tenant the data was cloned from
    pub source: TenantContext,
    /// Tenant holding the cloned tables
    pub dest: TenantContext,
    /// Whether the source tenant has the link manager enabled
    #[serde(default)]
    pub link_manager_enabled: bool,
}

/// Columns to rewrite and the replacements to apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewritePlan {
    /// Logical table → columns, in rewrite order
    pub tables: TenantTableSet,
    /// Replacements, in application order
    pub substitutions: SubstitutionMap,
    /// Manifest columns the destination does not have
    pub missing_columns: Vec<ColumnNotFound>,
}

impl RewritePlan {
    /// Number of (table, column) pairs
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.tables.iter().map(|(_, columns)| columns.len()).sum()
    }
}

/// Outcome of a rewrite pass
#[derive(Debug, Default)]
pub struct RewriteReport {
    /// Per-column results, in plan order
    pub columns: Vec<ColumnReport>,
    /// Manifest columns skipped because the destination lacks them
    pub missing_columns: Vec<ColumnNotFound>,
}

impl RewriteReport {
    /// Rows changed across all columns
    #[must_use]
    pub fn rows_updated(&self) -> u64 {
        self.columns.iter().map(|c| c.rows_updated).sum()
    }

    /// Values skipped because they could not be decoded
    #[must_use]
    pub fn skipped_values(&self) -> usize {
        self.columns.iter().map(|c| c.skipped).sum()
    }

    /// Columns with at least one failed statement
    pub fn failed_columns(&self) -> impl Iterator<Item = &ColumnReport> {
        self.columns.iter().filter(|c| !c.is_clean())
    }
}

/// Rewrites references to the source tenant in the destination tables
pub struct ReferenceRewritePass {
    catalog: SchemaCatalog,
    rows: RowRewriter,
    tables: TablesConfig,
    concurrency: usize,
}

impl std::fmt::Debug for ReferenceRewritePass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceRewritePass")
            .field("merge", &self.tables.merge)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl ReferenceRewritePass {
    /// Create pass
    #[must_use]
    pub fn new(executor: Arc<dyn SqlExecutor>, config: &CloneConfig) -> Self {
        let resolver =
            ClassResolver::default().with_classes(config.rewrite.known_classes.iter().cloned());
        Self {
            catalog: SchemaCatalog::new(Arc::clone(&executor)),
            rows: RowRewriter::new(executor, ValueRewriter::with_resolver(resolver)),
            tables: config.tables.clone(),
            concurrency: config.rewrite.column_concurrency.max(1),
        }
    }

    /// Work out which columns to rewrite
    ///
    /// Every destination table starts with all of its columns. A manifest
    /// entry then replaces that list (`override`) or moves its columns to
    /// the front of it (`augment`).
    ///
    /// # Errors
    /// Returns [`RewriteError::SchemaDiscovery`] if the destination tables or
    /// their columns cannot be listed.
    pub async fn plan(&self, inputs: &RewriteInputs) -> Result<RewritePlan, RewriteError> {
        let dest = &inputs.dest;
        let mut tables = TenantTableSet::new();
        for table in self.catalog.list_tables(&dest.prefix).await? {
            let Some(logical) = dest.logical(&table) else {
                continue;
            };
            let columns = self.catalog.list_columns(&table).await?;
            tables.insert(logical, columns);
        }

        let mut manifest = self.tables.manifest.clone();
        if !inputs.link_manager_enabled && manifest.remove(&self.tables.link_table).is_some() {
            debug!(table = %self.tables.link_table, "Link manager disabled, table keeps discovered columns");
        }

        let mut missing_columns = Vec::new();
        for (logical, wanted) in manifest.iter() {
            let Some(discovered) = tables.columns_mut(logical) else {
                debug!(table = %logical, "Manifest table absent from destination");
                continue;
            };

            let mut merged = Vec::with_capacity(wanted.len());
            for column in wanted {
                if discovered.contains(column) {
                    merged.push(column.clone());
                } else {
                    let missing = ColumnNotFound {
                        table: logical.to_string(),
                        column: column.clone(),
                    };
                    debug!(table = %logical, column = %column, "{missing}");
                    missing_columns.push(missing);
                }
            }
            if self.tables.merge == ManifestMerge::Augment {
                for column in discovered.drain(..) {
                    if !merged.contains(&column) {
                        merged.push(column);
                    }
                }
            }
            *discovered = merged;
        }

        Ok(RewritePlan {
            tables,
            substitutions: SubstitutionMap::for_tenants(&inputs.source, dest),
            missing_columns,
        })
    }

    /// Plan and apply the rewrite
    ///
    /// Replacements for one column run in map order; different columns may
    /// run concurrently.
    ///
    /// # Errors
    /// Returns [`RewriteError::SchemaDiscovery`] if planning fails. Column
    /// and value failures are reported in [`RewriteReport`].
    pub async fn run(&self, inputs: &RewriteInputs) -> Result<RewriteReport, RewriteError> {
        let plan = self.plan(inputs).await?;
        info!(
            dest = %inputs.dest.prefix,
            tables = plan.tables.len(),
            columns = plan.column_count(),
            substitutions = plan.substitutions.len(),
            "Rewriting references"
        );

        let jobs: Vec<(String, String)> = plan
            .tables
            .iter()
            .flat_map(|(logical, columns)| {
                columns
                    .iter()
                    .map(move |column| (inputs.dest.table(logical), column.clone()))
            })
            .collect();

        let substitutions = &plan.substitutions;
        let columns: Vec<ColumnReport> = stream::iter(jobs)
            .map(|(table, column)| async move {
                let mut report = ColumnReport::new(table.as_str(), column.as_str());
                for entry in substitutions.iter() {
                    let step = self
                        .rows
                        .rewrite_column(&table, &column, &entry.from, &entry.to)
                        .await;
                    report.absorb(step);
                }
                report
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let report = RewriteReport {
            columns,
            missing_columns: plan.missing_columns,
        };
        for failed in report.failed_columns() {
            warn!(
                table = %failed.table,
                column = %failed.column,
                failures = failed.failures.len(),
                "Column rewrite incomplete"
            );
        }
        info!(
            dest = %inputs.dest.prefix,
            rows = report.rows_updated(),
            skipped = report.skipped_values(),
            "References rewritten"
        );
        Ok(report)
    }
}

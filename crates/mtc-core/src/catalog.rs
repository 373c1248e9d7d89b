//! Schema catalog reader
//!
//! Lists tenant tables and their columns through the SQL executor. Any
//! failure here is a [`SchemaDiscoveryError`]: without a reliable table list
//! the run cannot tell which tables belong to the tenant.

use crate::error::{SchemaDiscoveryError, SqlError};
use crate::sql::{SqlExecutor, SqlValue};
use std::sync::Arc;
use tracing::debug;

/// Table and column discovery
#[derive(Clone)]
pub struct SchemaCatalog {
    executor: Arc<dyn SqlExecutor>,
}

impl std::fmt::Debug for SchemaCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCatalog")
            .field("dialect", &self.executor.dialect())
            .finish()
    }
}

impl SchemaCatalog {
    /// Create catalog reader over an executor
    #[inline]
    #[must_use]
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        Self { executor }
    }

    /// Tables whose name starts with `prefix`, sorted by name
    ///
    /// The LIKE pattern is escaped, so `_` in a prefix only matches `_`. The
    /// result is filtered again case-sensitively because MySQL collations
    /// compare table names case-insensitively on some platforms.
    ///
    /// # Errors
    /// Returns [`SchemaDiscoveryError`] if the catalog query fails.
    pub async fn list_tables(&self, prefix: &str) -> Result<Vec<String>, SchemaDiscoveryError> {
        let statement = self.executor.dialect().list_tables(prefix);
        let values = self
            .executor
            .query_column(&statement)
            .await
            .map_err(|e| SchemaDiscoveryError::new(prefix, e))?;

        let tables: Vec<String> = text_cells(values, &statement.sql)
            .map_err(|e| SchemaDiscoveryError::new(prefix, e))?
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .collect();

        debug!(prefix = %prefix, count = tables.len(), "Discovered tables");
        Ok(tables)
    }

    /// Columns of `table` in definition order
    ///
    /// # Errors
    /// Returns [`SchemaDiscoveryError`] if the table cannot be inspected.
    pub async fn list_columns(&self, table: &str) -> Result<Vec<String>, SchemaDiscoveryError> {
        let statement = self.executor.dialect().list_columns(table);
        let values = self
            .executor
            .query_column(&statement)
            .await
            .map_err(|e| SchemaDiscoveryError::new(table, e))?;
        text_cells(values, &statement.sql).map_err(|e| SchemaDiscoveryError::new(table, e))
    }
}

fn text_cells(values: Vec<SqlValue>, sql: &str) -> Result<Vec<String>, SqlError> {
    values
        .into_iter()
        .map(|value| match value {
            SqlValue::Text(s) => Ok(s),
            other => Err(SqlError::statement(
                sql,
                format!("catalog returned a non-text name: {other:?}"),
            )),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{Dialect, QueryMode, QueryResult, Row, Statement};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    /// Returns a fixed first column for every query
    struct FixedCatalog {
        names: Vec<&'static str>,
        fail: bool,
    }

    #[async_trait]
    impl SqlExecutor for FixedCatalog {
        fn dialect(&self) -> Dialect {
            Dialect::MySql
        }

        async fn execute(&self, _statement: &Statement) -> Result<u64, SqlError> {
            Ok(0)
        }

        async fn query(
            &self,
            statement: &Statement,
            mode: QueryMode,
        ) -> Result<QueryResult, SqlError> {
            if self.fail {
                return Err(SqlError::statement(&statement.sql, "access denied"));
            }
            let rows = self
                .names
                .iter()
                .map(|n| Row::from([("name".to_string(), SqlValue::from(*n))]))
                .collect();
            Ok(QueryResult::from_rows(rows, mode))
        }
    }

    fn catalog(names: Vec<&'static str>, fail: bool) -> SchemaCatalog {
        SchemaCatalog::new(Arc::new(FixedCatalog { names, fail }))
    }

    #[tokio::test]
    async fn list_tables_rechecks_prefix_case() {
        let catalog = catalog(vec!["WP_5_posts", "wp_5_options", "wp_5_posts"], false);
        let tables = catalog.list_tables("wp_5_").await.unwrap();
        assert_eq!(tables, vec!["wp_5_options", "wp_5_posts"]);
    }

    #[tokio::test]
    async fn discovery_failure_names_target() {
        let err = catalog(Vec::new(), true).list_columns("wp_5_posts").await.unwrap_err();
        assert_eq!(err.target, "wp_5_posts");
        assert!(matches!(err.source, SqlError::Statement { .. }));
    }
}

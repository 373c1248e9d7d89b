//! Per-tenant options table access

use crate::error::{OptionError, SqlError};
use crate::sql::{SqlExecutor, SqlValue, Statement};
use crate::types::{BaselineOptions, TenantContext};
use std::sync::Arc;
use tracing::debug;

/// Logical name of the options table
pub const OPTIONS_TABLE: &str = "options";

/// Reads and writes rows of a tenant's options table
#[derive(Clone)]
pub struct OptionStore {
    executor: Arc<dyn SqlExecutor>,
}

impl std::fmt::Debug for OptionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionStore").finish_non_exhaustive()
    }
}

impl OptionStore {
    /// Create store over an executor
    #[inline]
    #[must_use]
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        Self { executor }
    }

    /// Stored value of an option
    ///
    /// # Errors
    /// Returns [`OptionError::Read`] if the query fails.
    pub async fn get(&self, tenant: &TenantContext, name: &str) -> Result<Option<String>, OptionError> {
        let statement = self.select(tenant, "option_value", name);
        let value = self
            .executor
            .query_scalar(&statement)
            .await
            .map_err(|source| read_error(tenant, name, source))?;
        Ok(match value {
            Some(SqlValue::Text(s)) => Some(s),
            Some(SqlValue::Integer(i)) => Some(i.to_string()),
            Some(SqlValue::Real(r)) => Some(r.to_string()),
            Some(SqlValue::Blob(b)) => Some(String::from_utf8_lossy(&b).into_owned()),
            Some(SqlValue::Null) | None => None,
        })
    }

    /// Store an option, inserting the row if it does not exist
    ///
    /// # Errors
    /// Returns [`OptionError`] if the lookup or write fails.
    pub async fn set(&self, tenant: &TenantContext, name: &str, value: &str) -> Result<(), OptionError> {
        let dialect = self.executor.dialect();
        let table = dialect.quote_ident(&tenant.table(OPTIONS_TABLE));

        let exists = self
            .executor
            .query_scalar(&self.select(tenant, "COUNT(*)", name))
            .await
            .map_err(|source| read_error(tenant, name, source))?
            .is_some_and(|count| count != SqlValue::Integer(0));

        let statement = if exists {
            Statement::new(format!("UPDATE {table} SET option_value = ? WHERE option_name = ?"))
                .bind(value)
                .bind(name)
        } else {
            Statement::new(format!("INSERT INTO {table} (option_name, option_value) VALUES (?, ?)"))
                .bind(name)
                .bind(value)
        };

        self.executor
            .execute(&statement)
            .await
            .map_err(|source| OptionError::Write {
                tenant: tenant.id,
                name: name.to_string(),
                source,
            })?;
        debug!(tenant = %tenant.id, option = %name, inserted = !exists, "Option stored");
        Ok(())
    }

    /// Write the identity options of a freshly cloned tenant
    ///
    /// # Errors
    /// Returns the first [`OptionError`]; later options are not written.
    pub async fn set_baseline(
        &self,
        tenant: &TenantContext,
        baseline: &BaselineOptions,
    ) -> Result<(), OptionError> {
        for (name, value) in baseline.entries() {
            self.set(tenant, name, value).await?;
        }
        Ok(())
    }

    /// Option interpreted as a boolean
    ///
    /// Missing, empty and `"0"` are false; anything else is true.
    ///
    /// # Errors
    /// Returns [`OptionError::Read`] if the query fails.
    pub async fn flag(&self, tenant: &TenantContext, name: &str) -> Result<bool, OptionError> {
        Ok(self
            .get(tenant, name)
            .await?
            .is_some_and(|value| is_truthy(&value)))
    }

    fn select(&self, tenant: &TenantContext, what: &str, name: &str) -> Statement {
        let dialect = self.executor.dialect();
        Statement::new(format!(
            "SELECT {what} FROM {} WHERE option_name = ? LIMIT 1",
            dialect.quote_ident(&tenant.table(OPTIONS_TABLE))
        ))
        .bind(name)
    }
}

fn read_error(tenant: &TenantContext, name: &str, source: SqlError) -> OptionError {
    OptionError::Read {
        tenant: tenant.id,
        name: name.to_string(),
        source,
    }
}

/// Loose boolean reading of a stored option value
#[must_use]
pub fn is_truthy(value: &str) -> bool {
    !matches!(value, "" | "0")
}

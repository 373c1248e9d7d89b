//! Column-level substring rewrite

use crate::error::SqlError;
use crate::sql::{SqlExecutor, SqlValue, Statement};
use indexmap::IndexSet;
use mtc_serial::{looks_serialized, DecodeError, ValueRewriter};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of rewriting one column
#[derive(Debug, Default)]
pub struct ColumnReport {
    /// Physical table name
    pub table: String,
    /// Column name
    pub column: String,
    /// Distinct stored values containing the search text
    pub candidates: usize,
    /// Distinct values written back
    pub rewritten: usize,
    /// Rows changed by the updates
    pub rows_updated: u64,
    /// Values left as they were: undecodable, or serialized bytes that are not UTF-8
    pub skipped: usize,
    /// Statements that failed
    pub failures: Vec<SqlError>,
}

impl ColumnReport {
    /// Empty report for a column
    #[must_use]
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            ..Self::default()
        }
    }

    /// Fold another report on the same column into this one
    pub fn absorb(&mut self, other: Self) {
        self.candidates += other.candidates;
        self.rewritten += other.rewritten;
        self.rows_updated += other.rows_updated;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }

    /// Whether every statement succeeded
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Rewrites the stored values of one column
///
/// Rows are targeted by their old value: `UPDATE .. WHERE column = old`
/// changes every row holding that exact value in one statement.
#[derive(Clone)]
pub struct RowRewriter {
    executor: Arc<dyn SqlExecutor>,
    values: ValueRewriter,
}

impl std::fmt::Debug for RowRewriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowRewriter")
            .field("values", &self.values)
            .finish_non_exhaustive()
    }
}

impl RowRewriter {
    /// Create row rewriter
    #[inline]
    #[must_use]
    pub fn new(executor: Arc<dyn SqlExecutor>, values: ValueRewriter) -> Self {
        Self { executor, values }
    }

    /// Replace `from` with `to` in every value of `table.column`
    ///
    /// Failures are reported, never returned: an undecodable value is
    /// skipped and a failed statement is recorded.
    pub async fn rewrite_column(&self, table: &str, column: &str, from: &str, to: &str) -> ColumnReport {
        let mut report = ColumnReport::new(table, column);
        if from.is_empty() {
            return report;
        }

        let candidates = match self.candidates(table, column, from).await {
            Ok(values) => values,
            Err(e) => {
                warn!(table = %table, column = %column, error = %e, "Candidate query failed");
                report.failures.push(e);
                return report;
            }
        };
        report.candidates = candidates.len();

        for stored in &candidates {
            let new = match self.rewrite_stored(stored, from, to) {
                Ok(Some(new)) => new,
                Ok(None) => continue,
                Err(Skip::Undecodable(e)) => {
                    warn!(
                        table = %table,
                        column = %column,
                        offset = e.offset(),
                        error = %e,
                        "Skipping undecodable value"
                    );
                    report.skipped += 1;
                    continue;
                }
                Err(Skip::NotUtf8 { valid_up_to }) => {
                    warn!(
                        table = %table,
                        column = %column,
                        offset = valid_up_to,
                        "Skipping serialized value that is not UTF-8"
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            let statement = self.update(table, column, new, stored);
            match self.executor.execute(&statement).await {
                Ok(0) => {
                    warn!(table = %table, column = %column, "Update matched no rows");
                    report
                        .failures
                        .push(SqlError::statement(statement.sql, "no row holds the selected value"));
                }
                Ok(rows) => {
                    report.rewritten += 1;
                    report.rows_updated += rows;
                }
                Err(e) => {
                    warn!(table = %table, column = %column, error = %e, "Update failed");
                    report.failures.push(e);
                }
            }
        }

        debug!(
            table = %table,
            column = %column,
            from = %from,
            candidates = report.candidates,
            rewritten = report.rewritten,
            rows = report.rows_updated,
            "Column rewritten"
        );
        report
    }

    /// Distinct stored values containing `from`, case-sensitively
    async fn candidates(&self, table: &str, column: &str, from: &str) -> Result<IndexSet<Stored>, SqlError> {
        let dialect = self.executor.dialect();
        let col = dialect.quote_ident(column);
        let statement = Statement::new(format!(
            "SELECT {col} FROM {} WHERE {col} LIKE ?{}",
            dialect.quote_ident(table),
            dialect.like_escape()
        ))
        .bind(dialect.contains_pattern(from));

        Ok(self
            .executor
            .query_column(&statement)
            .await?
            .into_iter()
            .filter_map(|value| match value {
                SqlValue::Text(text) if text.contains(from) => Some(Stored::Text(text)),
                SqlValue::Blob(bytes) if find_bytes(&bytes, from.as_bytes()).is_some() => {
                    Some(Stored::Bytes(bytes))
                }
                _ => None,
            })
            .collect())
    }

    /// New value for a stored one, `None` when nothing changes
    fn rewrite_stored(&self, stored: &Stored, from: &str, to: &str) -> Result<Option<SqlValue>, Skip> {
        match stored {
            Stored::Text(raw) => Ok(owned(self.values.rewrite(raw, from, to)?).map(SqlValue::Text)),
            Stored::Bytes(raw) => match std::str::from_utf8(raw) {
                Ok(text) => {
                    let new = owned(self.values.rewrite(text, from, to)?);
                    Ok(new.map(|new| SqlValue::Blob(new.into_bytes())))
                }
                Err(e) if looks_serialized(&String::from_utf8_lossy(raw)) => Err(Skip::NotUtf8 {
                    valid_up_to: e.valid_up_to(),
                }),
                Err(_) => Ok(replace_bytes(raw, from.as_bytes(), to.as_bytes()).map(SqlValue::Blob)),
            },
        }
    }

    fn update(&self, table: &str, column: &str, new: SqlValue, old: &Stored) -> Statement {
        let dialect = self.executor.dialect();
        match old {
            Stored::Text(old) => {
                let col = dialect.quote_ident(column);
                Statement::new(format!(
                    "UPDATE {} SET {col} = ? WHERE {col} = ?",
                    dialect.quote_ident(table)
                ))
                .bind(new)
                .bind(old.as_str())
            }
            Stored::Bytes(old) => dialect
                .update_bytes(table, column)
                .bind(new)
                .bind(old.clone()),
        }
    }
}

/// Stored cell selected for rewriting
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Stored {
    Text(String),
    /// BLOB cell, or TEXT that is not valid UTF-8, byte for byte
    Bytes(Vec<u8>),
}

/// Why a candidate was left untouched
enum Skip {
    Undecodable(DecodeError),
    NotUtf8 { valid_up_to: usize },
}

impl From<DecodeError> for Skip {
    fn from(e: DecodeError) -> Self {
        Self::Undecodable(e)
    }
}

fn owned(value: Cow<'_, str>) -> Option<String> {
    match value {
        Cow::Owned(s) => Some(s),
        Cow::Borrowed(_) => None,
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Literal replace on raw bytes, following [`mtc_serial::replace_plain`]
fn replace_bytes(value: &[u8], from: &[u8], to: &[u8]) -> Option<Vec<u8>> {
    if from.is_empty() || find_bytes(value, to).is_some() || find_bytes(value, from).is_none() {
        return None;
    }
    let mut out = Vec::with_capacity(value.len() + to.len());
    let mut rest = value;
    while let Some(at) = find_bytes(rest, from) {
        out.extend_from_slice(&rest[..at]);
        out.extend_from_slice(to);
        rest = &rest[at + from.len()..];
    }
    out.extend_from_slice(rest);
    Some(out)
}

//! SQL execution interface
//!
//! The engine never talks to a database driver directly. It builds
//! [`Statement`]s with positional parameters and hands them to a
//! [`SqlExecutor`]. The [`Dialect`] covers the few places where MySQL and
//! SQLite disagree: identifier quoting, LIKE escaping and catalog queries.

use crate::error::SqlError;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Parameter or result cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// SQL NULL
    Null,
    /// Integer
    Integer(i64),
    /// Floating point
    Real(f64),
    /// Text
    Text(String),
    /// Binary, or text that is not valid UTF-8
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Borrow text content
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Take text content
    #[inline]
    #[must_use]
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Blob(b)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

/// One result row, columns in select order
pub type Row = IndexMap<String, SqlValue>;

/// SQL text plus positional (`?`) parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text
    pub sql: String,
    /// Positional parameters
    pub params: Vec<SqlValue>,
}

impl Statement {
    /// Statement without parameters
    #[inline]
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append a parameter
    #[inline]
    #[must_use]
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Requested result shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// First column of every row
    Column,
    /// First row
    Row,
    /// First column of the first row
    Scalar,
    /// All rows
    Rows,
}

impl QueryMode {
    /// Short name for diagnostics
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Column => "column",
            Self::Row => "row",
            Self::Scalar => "scalar",
            Self::Rows => "rows",
        }
    }
}

/// Query result in the requested shape
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// First column of every row
    Column(Vec<SqlValue>),
    /// First row, if any
    Row(Option<Row>),
    /// First cell, if any
    Scalar(Option<SqlValue>),
    /// All rows
    Rows(Vec<Row>),
}

impl QueryResult {
    /// Shape this result has
    #[must_use]
    pub const fn mode(&self) -> QueryMode {
        match self {
            Self::Column(_) => QueryMode::Column,
            Self::Row(_) => QueryMode::Row,
            Self::Scalar(_) => QueryMode::Scalar,
            Self::Rows(_) => QueryMode::Rows,
        }
    }

    /// Project a full row set into the requested shape
    ///
    /// Executors that always fetch complete rows can build every mode from
    /// this one function.
    #[must_use]
    pub fn from_rows(rows: Vec<Row>, mode: QueryMode) -> Self {
        let first_cell = |row: Row| row.into_iter().next().map(|(_, v)| v);
        match mode {
            QueryMode::Rows => Self::Rows(rows),
            QueryMode::Row => Self::Row(rows.into_iter().next()),
            QueryMode::Scalar => Self::Scalar(rows.into_iter().next().and_then(first_cell)),
            QueryMode::Column => Self::Column(rows.into_iter().filter_map(first_cell).collect()),
        }
    }

    fn shape_error(&self, expected: QueryMode) -> SqlError {
        SqlError::UnexpectedShape {
            expected: expected.name(),
            found: self.mode().name(),
        }
    }
}

/// SQL dialect of the backing database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// MySQL / MariaDB
    MySql,
    /// SQLite
    Sqlite,
}

impl Dialect {
    /// Quote an identifier, doubling embedded quote characters
    #[must_use]
    pub fn quote_ident(self, ident: &str) -> String {
        let q = match self {
            Self::MySql => '`',
            Self::Sqlite => '"',
        };
        let mut out = String::with_capacity(ident.len() + 2);
        out.push(q);
        for c in ident.chars() {
            if c == q {
                out.push(q);
            }
            out.push(c);
        }
        out.push(q);
        out
    }

    /// Escape LIKE wildcards so `text` matches literally
    #[must_use]
    pub fn escape_like(self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            if matches!(c, '\\' | '%' | '_') {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }

    /// Suffix declaring the LIKE escape character
    ///
    /// MySQL defaults to backslash; SQLite has no default.
    #[must_use]
    pub const fn like_escape(self) -> &'static str {
        match self {
            Self::MySql => "",
            Self::Sqlite => " ESCAPE '\\'",
        }
    }

    /// Pattern matching any value containing `text`
    #[must_use]
    pub fn contains_pattern(self, text: &str) -> String {
        format!("%{}%", self.escape_like(text))
    }

    /// Pattern matching any value starting with `text`
    #[must_use]
    pub fn prefix_pattern(self, text: &str) -> String {
        format!("{}%", self.escape_like(text))
    }

    /// Query listing base tables whose name starts with `prefix`
    ///
    /// Engines may match LIKE case-insensitively; callers re-check the prefix.
    #[must_use]
    pub fn list_tables(self, prefix: &str) -> Statement {
        let sql = match self {
            Self::MySql => {
                "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' \
                 AND TABLE_NAME LIKE ? ORDER BY TABLE_NAME"
                    .to_string()
            }
            Self::Sqlite => format!(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name LIKE ?{} ORDER BY name",
                self.like_escape()
            ),
        };
        Statement::new(sql).bind(self.prefix_pattern(prefix))
    }

    /// Query listing the columns of `table` in definition order
    #[must_use]
    pub fn list_columns(self, table: &str) -> Statement {
        match self {
            Self::MySql => Statement::new(format!("SHOW COLUMNS FROM {}", self.quote_ident(table))),
            Self::Sqlite => {
                Statement::new("SELECT name FROM pragma_table_info(?) ORDER BY cid").bind(table)
            }
        }
    }

    /// Update matching a cell by its exact bytes
    ///
    /// Binds the new value, then the old bytes. On SQLite a TEXT cell stays
    /// TEXT and a BLOB cell stays BLOB.
    #[must_use]
    pub fn update_bytes(self, table: &str, column: &str) -> Statement {
        let table = self.quote_ident(table);
        let col = self.quote_ident(column);
        Statement::new(match self {
            Self::MySql => format!("UPDATE {table} SET {col} = ? WHERE BINARY {col} = ?"),
            Self::Sqlite => format!(
                "UPDATE {table} SET {col} = CASE typeof({col}) WHEN 'text' THEN CAST(?1 AS TEXT) ELSE ?1 END \
                 WHERE CAST({col} AS BLOB) = ?2"
            ),
        })
    }

    /// `DROP TABLE IF EXISTS`
    #[must_use]
    pub fn drop_table(self, table: &str) -> Statement {
        Statement::new(format!("DROP TABLE IF EXISTS {}", self.quote_ident(table)))
    }

    /// `INSERT INTO dest SELECT * FROM source`
    #[must_use]
    pub fn copy_rows(self, dest: &str, source: &str) -> Statement {
        Statement::new(format!(
            "INSERT INTO {} SELECT * FROM {}",
            self.quote_ident(dest),
            self.quote_ident(source)
        ))
    }
}

/// Capability to run SQL against the shared tenant database
///
/// Implementations must be usable from several tasks at once; the engine may
/// clone independent tables concurrently.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Dialect of the backing database
    fn dialect(&self) -> Dialect;

    /// Run a statement, returning the affected row count
    async fn execute(&self, statement: &Statement) -> Result<u64, SqlError>;

    /// Run a query, returning the requested shape
    async fn query(&self, statement: &Statement, mode: QueryMode) -> Result<QueryResult, SqlError>;

    /// Run a query and return its first column
    async fn query_column(&self, statement: &Statement) -> Result<Vec<SqlValue>, SqlError> {
        match self.query(statement, QueryMode::Column).await? {
            QueryResult::Column(values) => Ok(values),
            other => Err(other.shape_error(QueryMode::Column)),
        }
    }

    /// Run a query and return its first cell
    async fn query_scalar(&self, statement: &Statement) -> Result<Option<SqlValue>, SqlError> {
        match self.query(statement, QueryMode::Scalar).await? {
            QueryResult::Scalar(value) => Ok(value),
            other => Err(other.shape_error(QueryMode::Scalar)),
        }
    }

    /// Run a query and return every row
    async fn query_rows(&self, statement: &Statement) -> Result<Vec<Row>, SqlError> {
        match self.query(statement, QueryMode::Rows).await? {
            QueryResult::Rows(rows) => Ok(rows),
            other => Err(other.shape_error(QueryMode::Rows)),
        }
    }
}

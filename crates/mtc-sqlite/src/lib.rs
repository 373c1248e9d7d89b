//! MTC SQLite
//!
//! [`SqlExecutor`] over a single `rusqlite` connection. Statements are
//! serialized through a mutex and run on tokio's blocking pool.
//!
//! TEXT cells that are not valid UTF-8 come back as [`SqlValue::Blob`] with
//! their exact bytes.

use async_trait::async_trait;
use mtc_core::{Dialect, QueryMode, QueryResult, Row, SqlError, SqlExecutor, SqlValue, Statement};
use parking_lot::Mutex;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// SQLite-backed executor
#[derive(Clone)]
pub struct SqliteExecutor {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteExecutor").finish_non_exhaustive()
    }
}

impl SqliteExecutor {
    /// Open (or create) a database file
    ///
    /// # Errors
    /// Returns [`SqlError::Connection`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqlError> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| SqlError::Connection(format!("{}: {e}", path.display())))?;
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database
    ///
    /// # Errors
    /// Returns [`SqlError::Connection`] if SQLite cannot allocate it.
    pub fn open_in_memory() -> Result<Self, SqlError> {
        let conn = Connection::open_in_memory().map_err(|e| SqlError::Connection(e.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an open connection
    #[must_use]
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run several `;`-separated statements without parameters
    ///
    /// Blocking; meant for schema setup.
    ///
    /// # Errors
    /// Returns [`SqlError::Statement`] on the first failing statement.
    pub fn execute_batch(&self, sql: &str) -> Result<(), SqlError> {
        self.conn
            .lock()
            .execute_batch(sql)
            .map_err(|e| SqlError::statement(sql, e))
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, SqlError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, SqlError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| SqlError::Connection(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl SqlExecutor for SqliteExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute(&self, statement: &Statement) -> Result<u64, SqlError> {
        trace!(sql = %statement.sql, "execute");
        let statement = statement.clone();
        self.blocking(move |conn| {
            let fail = |e: rusqlite::Error| SqlError::statement(statement.sql.as_str(), e);
            let mut prepared = conn.prepare(&statement.sql).map_err(fail)?;
            let changed = prepared
                .execute(params_from_iter(statement.params.iter().map(to_value)))
                .map_err(fail)?;
            Ok(changed as u64)
        })
        .await
    }

    async fn query(&self, statement: &Statement, mode: QueryMode) -> Result<QueryResult, SqlError> {
        trace!(sql = %statement.sql, mode = mode.name(), "query");
        let statement = statement.clone();
        self.blocking(move |conn| {
            let fail = |e: rusqlite::Error| SqlError::statement(statement.sql.as_str(), e);
            let mut prepared = conn.prepare(&statement.sql).map_err(fail)?;
            let names: Vec<String> = prepared.column_names().into_iter().map(String::from).collect();
            let single = matches!(mode, QueryMode::Row | QueryMode::Scalar);

            let mut rows = prepared
                .query(params_from_iter(statement.params.iter().map(to_value)))
                .map_err(fail)?;
            let mut collected = Vec::new();
            while let Some(row) = rows.next().map_err(fail)? {
                let mut cells = Row::with_capacity(names.len());
                for (i, name) in names.iter().enumerate() {
                    cells.insert(name.clone(), from_value_ref(row.get_ref(i).map_err(fail)?));
                }
                collected.push(cells);
                if single {
                    break;
                }
            }
            Ok(QueryResult::from_rows(collected, mode))
        })
        .await
    }
}

fn to_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(*i),
        SqlValue::Real(r) => Value::Real(*r),
        SqlValue::Text(s) => Value::Text(s.clone()),
        SqlValue::Blob(b) => Value::Blob(b.clone()),
    }
}

fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(r) => SqlValue::Real(r),
        ValueRef::Text(t) => match std::str::from_utf8(t) {
            Ok(text) => SqlValue::Text(text.to_owned()),
            Err(_) => SqlValue::Blob(t.to_vec()),
        },
        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn execute_and_query_shapes() {
        let db = SqliteExecutor::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, data BLOB)")
            .unwrap();

        let insert = Statement::new("INSERT INTO t (name, data) VALUES (?, ?)");
        let n = db
            .execute(&insert.clone().bind("alpha").bind(SqlValue::Blob(vec![0, 1])))
            .await
            .unwrap();
        assert_eq!(n, 1);
        db.execute(&insert.bind("bravo").bind(SqlValue::Null)).await.unwrap();

        let names = db
            .query_column(&Statement::new("SELECT name FROM t ORDER BY id"))
            .await
            .unwrap();
        assert_eq!(names, vec![SqlValue::from("alpha"), SqlValue::from("bravo")]);

        let count = db
            .query_scalar(&Statement::new("SELECT COUNT(*) FROM t"))
            .await
            .unwrap();
        assert_eq!(count, Some(SqlValue::Integer(2)));

        let rows = db
            .query_rows(&Statement::new("SELECT * FROM t WHERE name = ?").bind("alpha"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("data"), Some(&SqlValue::Blob(vec![0, 1])));
    }

    #[tokio::test]
    async fn failing_statement_keeps_sql() {
        let db = SqliteExecutor::open_in_memory().unwrap();
        let err = db.execute(&Statement::new("DROP TABLE nope")).await.unwrap_err();
        match err {
            SqlError::Statement { sql, .. } => assert_eq!(sql, "DROP TABLE nope"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn like_escape_matches_literally() {
        let db = SqliteExecutor::open_in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE wp_5_posts (a); CREATE TABLE wp_50_posts (a); CREATE TABLE wpx5_posts (a);",
        )
        .unwrap();
        let tables = db
            .query_column(&Dialect::Sqlite.list_tables("wp_5_"))
            .await
            .unwrap();
        assert_eq!(tables, vec![SqlValue::from("wp_5_posts")]);
    }

    #[tokio::test]
    async fn non_utf8_text_keeps_its_bytes() {
        let db = SqliteExecutor::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE t (v TEXT); INSERT INTO t VALUES (CAST(X'E961' AS TEXT));")
            .unwrap();

        let cells = db.query_column(&Statement::new("SELECT v FROM t")).await.unwrap();
        assert_eq!(cells, vec![SqlValue::Blob(vec![0xE9, b'a'])]);

        let update = Dialect::Sqlite
            .update_bytes("t", "v")
            .bind(vec![0xE9, b'b'])
            .bind(vec![0xE9, b'a']);
        assert_eq!(db.execute(&update).await.unwrap(), 1);

        let kind = db
            .query_scalar(&Statement::new("SELECT typeof(v) || ':' || hex(v) FROM t"))
            .await
            .unwrap();
        assert_eq!(kind, Some(SqlValue::from("text:E962")));
    }
}

//! Table structure cloning
//!
//! MySQL copies a table definition with `CREATE TABLE .. LIKE ..`. SQLite has
//! no such statement, so the stored `CREATE TABLE` and `CREATE INDEX` text
//! of the source is re-issued with the object names swapped.

use crate::error::SqlError;
use crate::sql::{Dialect, SqlExecutor, SqlValue, Statement};

const TABLE_HEADS: [&str; 1] = ["CREATE TABLE "];
const INDEX_HEADS: [&str; 2] = ["CREATE UNIQUE INDEX ", "CREATE INDEX "];

/// Create `dest` with the structure of `source`
///
/// `dest` must not exist.
pub(crate) async fn create_table_like(
    executor: &dyn SqlExecutor,
    dest: &str,
    source: &str,
) -> Result<(), SqlError> {
    let dialect = executor.dialect();
    match dialect {
        Dialect::MySql => {
            let sql = format!(
                "CREATE TABLE {} LIKE {}",
                dialect.quote_ident(dest),
                dialect.quote_ident(source)
            );
            executor.execute(&Statement::new(sql)).await?;
        }
        Dialect::Sqlite => {
            for statement in sqlite_clone_statements(executor, dest, source).await? {
                executor.execute(&statement).await?;
            }
        }
    }
    Ok(())
}

async fn sqlite_clone_statements(
    executor: &dyn SqlExecutor,
    dest: &str,
    source: &str,
) -> Result<Vec<Statement>, SqlError> {
    let lookup = Statement::new(
        "SELECT type, sql FROM sqlite_master \
         WHERE tbl_name = ? AND type IN ('table', 'index') AND sql IS NOT NULL \
         ORDER BY CASE type WHEN 'table' THEN 0 ELSE 1 END, name",
    )
    .bind(source);
    let rows = executor.query_rows(&lookup).await?;

    let mut statements = Vec::with_capacity(rows.len());
    for row in rows {
        let kind = row.get("type").and_then(SqlValue::as_text).unwrap_or_default();
        let Some(ddl) = row.get("sql").and_then(SqlValue::as_text) else {
            continue;
        };
        let renamed = match kind {
            "table" => rename_table_ddl(ddl, dest),
            _ => rename_index_ddl(ddl, source, dest),
        };
        let sql = renamed.ok_or_else(|| {
            SqlError::statement(ddl, format!("cannot rename {kind} definition for {dest}"))
        })?;
        statements.push(Statement::new(sql));
    }

    if statements.is_empty() {
        return Err(SqlError::statement(&lookup.sql, format!("no such table: {source}")));
    }
    Ok(statements)
}

/// `CREATE TABLE` text with the table renamed
pub(crate) fn rename_table_ddl(ddl: &str, dest: &str) -> Option<String> {
    let (head, rest) = strip_head(ddl, &TABLE_HEADS)?;
    let (_, tail) = split_ident(rest)?;
    Some(format!("{head}{}{tail}", Dialect::Sqlite.quote_ident(dest)))
}

/// `CREATE INDEX` text moved onto `dest`, with a name derived from it
pub(crate) fn rename_index_ddl(ddl: &str, source: &str, dest: &str) -> Option<String> {
    let quote = |s: &str| Dialect::Sqlite.quote_ident(s);
    let (head, rest) = strip_head(ddl, &INDEX_HEADS)?;
    let (index, tail) = split_ident(rest)?;
    let (_, on) = strip_head(tail.trim_start(), &["ON "])?;
    let (_, tail) = split_ident(on)?;
    Some(format!(
        "{head}{} ON {}{tail}",
        quote(&index_name(&index, source, dest)),
        quote(dest)
    ))
}

/// SQLite index names are database-global, so every clone needs its own
fn index_name(index: &str, source: &str, dest: &str) -> String {
    match index.strip_prefix(source) {
        Some(rest) => format!("{dest}{rest}"),
        None => format!("{dest}_{index}"),
    }
}

fn strip_head<'a>(sql: &'a str, heads: &[&'static str]) -> Option<(&'static str, &'a str)> {
    heads.iter().find_map(|head| {
        sql.get(..head.len())
            .filter(|start| start.eq_ignore_ascii_case(head))
            .map(|_| (*head, &sql[head.len()..]))
    })
}

/// Split a leading identifier into its unquoted text and the remainder
fn split_ident(sql: &str) -> Option<(String, &str)> {
    let sql = sql.trim_start();
    let close = match sql.chars().next()? {
        '"' => '"',
        '`' => '`',
        '\'' => '\'',
        '[' => ']',
        _ => {
            let end = sql
                .find(|c: char| c.is_whitespace() || c == '(')
                .unwrap_or(sql.len());
            return (end > 0).then(|| (sql[..end].to_string(), &sql[end..]));
        }
    };

    let body = &sql[1..];
    let mut name = String::new();
    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == close {
            if close != ']' && chars.peek().map(|&(_, n)| n) == Some(close) {
                name.push(c);
                chars.next();
                continue;
            }
            return Some((name, &body[i + c.len_utf8()..]));
        }
        name.push(c);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn table_rename_handles_quoting() {
        assert_eq!(
            rename_table_ddl("CREATE TABLE wp_posts(ID INTEGER PRIMARY KEY)", "wp_5_posts").unwrap(),
            "CREATE TABLE \"wp_5_posts\"(ID INTEGER PRIMARY KEY)"
        );
        assert_eq!(
            rename_table_ddl("CREATE TABLE \"wp \"\"x\"\"\" (a TEXT)", "wp_5_x").unwrap(),
            "CREATE TABLE \"wp_5_x\" (a TEXT)"
        );
        assert_eq!(
            rename_table_ddl("CREATE TABLE [wp_options] (a)", "wp_5_options").unwrap(),
            "CREATE TABLE \"wp_5_options\" (a)"
        );
        assert!(rename_table_ddl("CREATE VIEW v AS SELECT 1", "x").is_none());
    }

    #[test]
    fn index_rename_derives_unique_name() {
        assert_eq!(
            rename_index_ddl(
                "CREATE INDEX wp_posts_type ON wp_posts (post_type)",
                "wp_posts",
                "wp_5_posts"
            )
            .unwrap(),
            "CREATE INDEX \"wp_5_posts_type\" ON \"wp_5_posts\" (post_type)"
        );
        assert_eq!(
            rename_index_ddl(
                "CREATE UNIQUE INDEX `option_name` ON `wp_options`(`option_name`)",
                "wp_options",
                "wp_5_options"
            )
            .unwrap(),
            "CREATE UNIQUE INDEX \"wp_5_options_option_name\" ON \"wp_5_options\"(`option_name`)"
        );
    }

    #[test]
    fn unterminated_identifier_is_rejected() {
        assert!(split_ident("\"never closed").is_none());
        assert!(split_ident("(a)").is_none());
    }
}

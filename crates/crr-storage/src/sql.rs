//! SQL text helpers, value conversion, and savepoint scoping.

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;

use crr_core::constants::CLOCK_TABLE_SUFFIX;
use crr_core::errors::{CrrError, CrrResult};
use crr_core::Value;

use crate::to_storage_err;

/// Quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for interpolation into SQL.
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Name of the clock table shadowing `table`.
pub fn clock_table_name(table: &str) -> String {
    format!("{table}{CLOCK_TABLE_SUFFIX}")
}

/// Comma-separated quoted identifiers, optionally qualified (`NEW."a", NEW."b"`).
pub fn ident_list<S: AsRef<str>>(names: &[S], qualifier: Option<&str>) -> String {
    names
        .iter()
        .map(|n| match qualifier {
            Some(q) => format!("{q}.{}", quote_ident(n.as_ref())),
            None => quote_ident(n.as_ref()),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `lhs."a" IS rhs."a" AND ...` over the given columns. An empty qualifier
/// leaves that side bare.
pub fn pk_match<S: AsRef<str>>(names: &[S], lhs: Option<&str>, rhs: &str) -> String {
    names
        .iter()
        .map(|n| {
            let col = quote_ident(n.as_ref());
            match lhs {
                Some(l) => format!("{l}.{col} IS {rhs}.{col}"),
                None => format!("{col} IS {rhs}.{col}"),
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `"a" IS ?1 AND "b" IS ?2 ...` with placeholders starting at `first`.
pub fn pk_bind_match<S: AsRef<str>>(names: &[S], qualifier: Option<&str>, first: usize) -> String {
    names
        .iter()
        .enumerate()
        .map(|(i, n)| {
            let col = quote_ident(n.as_ref());
            match qualifier {
                Some(q) => format!("{q}.{col} IS ?{}", first + i),
                None => format!("{col} IS ?{}", first + i),
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

pub fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(r) => SqlValue::Real(*r),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

/// Copy a host value out of a row. TEXT that is not valid UTF-8 is an error:
/// rewriting it would hand peers different bytes than the local cell holds.
pub fn from_value_ref(value: ValueRef<'_>) -> rusqlite::Result<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        ValueRef::Text(t) => Value::Text(
            std::str::from_utf8(t)
                .map_err(rusqlite::Error::Utf8Error)?
                .to_owned(),
        ),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    })
}

/// Map a row-read failure, reporting non-UTF-8 TEXT in `table` as a wire error.
pub fn read_err(table: &str, err: rusqlite::Error) -> CrrError {
    match err {
        rusqlite::Error::Utf8Error(e) => CrrError::Wire {
            reason: format!("{table} holds TEXT that is not valid UTF-8: {e}"),
        },
        other => to_storage_err(other.to_string()),
    }
}

/// Run `f` inside a named SAVEPOINT. Starts a transaction when none is open
/// and nests inside the caller's otherwise. Rolls back to the savepoint on error.
pub fn with_savepoint<T, F>(conn: &Connection, name: &str, f: F) -> CrrResult<T>
where
    F: FnOnce(&Connection) -> CrrResult<T>,
{
    conn.execute_batch(&format!("SAVEPOINT {name}"))
        .map_err(|e| to_storage_err(e.to_string()))?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {name}"))
                .map_err(|e| to_storage_err(e.to_string()))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rb) = conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}")) {
                tracing::warn!(savepoint = name, error = %rb, "savepoint rollback failed");
            }
            Err(err)
        }
    }
}

/// Whether a table (or any schema object of `kind`) named `name` exists.
pub fn object_exists(conn: &Connection, kind: &str, name: &str) -> CrrResult<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2)",
        rusqlite::params![kind, name],
        |row| row.get(0),
    )
    .map_err(|e| to_storage_err(e.to_string()))
}

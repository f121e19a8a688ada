//! Structural metadata for CRR tables, parsed from the host schema.
//!
//! `TableInfo` is what trigger and clock DDL generation consume; it is cached
//! per connection in [`TableInfoCache`] and rebuilt when the schema stamp
//! moves (see [`ensure_table_infos_are_up_to_date`]).

pub mod cache;

use rusqlite::Connection;

use crr_core::errors::CrrResult;

use crate::to_storage_err;

pub use cache::{ensure_table_infos_are_up_to_date, TableInfoCache};

/// One column as reported by `pragma_table_xinfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub cid: i64,
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub default: Option<String>,
    /// 1-based position in the primary key; 0 when not part of it.
    pub pk: i64,
    /// Non-zero for hidden and generated columns.
    pub hidden: i64,
}

impl ColumnInfo {
    pub fn is_generated(&self) -> bool {
        self.hidden >= 2
    }
}

/// Parsed column layout of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    /// Primary-key columns in key order.
    pub pks: Vec<ColumnInfo>,
    /// Ordinary (non-key, non-hidden) columns in declaration order.
    pub non_pks: Vec<ColumnInfo>,
    /// Generated or hidden columns; never tracked.
    pub hidden: Vec<ColumnInfo>,
}

impl TableInfo {
    pub fn pk_names(&self) -> Vec<String> {
        self.pks.iter().map(|c| c.name.clone()).collect()
    }

    pub fn non_pk_names(&self) -> Vec<String> {
        self.non_pks.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.non_pks.iter().any(|c| c.name == name)
    }

    /// Stable hash of the tracked layout. Changes whenever a column is added,
    /// removed, retyped, or the key changes.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.name.as_bytes());
        for col in self.pks.iter().chain(&self.non_pks) {
            hasher.update(b"\0");
            hasher.update(col.name.as_bytes());
            hasher.update(b"|");
            hasher.update(col.decl_type.as_bytes());
            hasher.update(format!("|{}|{}", col.not_null, col.pk).as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Read a table's layout. `None` when the table does not exist.
pub fn pull_table_info(conn: &Connection, table: &str) -> CrrResult<Option<TableInfo>> {
    let mut stmt = conn
        .prepare(
            "SELECT cid, name, type, \"notnull\", dflt_value, pk, hidden
             FROM pragma_table_xinfo(?1) ORDER BY cid",
        )
        .map_err(|e| to_storage_err(e.to_string()))?;
    let columns: Vec<ColumnInfo> = stmt
        .query_map([table], |row| {
            Ok(ColumnInfo {
                cid: row.get(0)?,
                name: row.get(1)?,
                decl_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                not_null: row.get(3)?,
                default: row.get(4)?,
                pk: row.get(5)?,
                hidden: row.get(6)?,
            })
        })
        .map_err(|e| to_storage_err(e.to_string()))?
        .collect::<Result<_, _>>()
        .map_err(|e| to_storage_err(e.to_string()))?;

    if columns.is_empty() {
        return Ok(None);
    }

    let (mut pks, rest): (Vec<_>, Vec<_>) = columns.into_iter().partition(|c| c.pk > 0);
    pks.sort_by_key(|c| c.pk);
    let (hidden, non_pks): (Vec<_>, Vec<_>) = rest.into_iter().partition(|c| c.hidden != 0);

    Ok(Some(TableInfo {
        name: table.to_string(),
        pks,
        non_pks,
        hidden,
    }))
}

//! DDL for the per-CRR clock table.

use rusqlite::Connection;

use crr_core::constants::SENTINEL_COLUMN;
use crr_core::errors::{CrrError, CrrResult};

use crate::sql::{clock_table_name, ident_list, quote_ident, quote_literal};
use crate::table_info::TableInfo;
use crate::to_storage_err;

/// Bookkeeping columns that follow the primary key columns, in order.
pub const CLOCK_META_COLUMNS: [&str; 6] = [
    "__crr_col_name",
    "__crr_col_version",
    "__crr_db_version",
    "__crr_site_id",
    "__crr_seq",
    "__crr_local_version",
];

/// Full column list of the clock table for `info`, quoted.
pub fn clock_columns(info: &TableInfo) -> String {
    format!(
        "{}, {}",
        ident_list(&info.pk_names(), None),
        ident_list(&CLOCK_META_COLUMNS, None)
    )
}

pub fn create_clock_table(conn: &Connection, info: &TableInfo) -> CrrResult<()> {
    let clock = clock_table_name(&info.name);
    let pk_defs = info
        .pks
        .iter()
        .map(|c| {
            if c.decl_type.is_empty() {
                quote_ident(&c.name)
            } else {
                format!("{} {}", quote_ident(&c.name), c.decl_type)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    let pk_list = ident_list(&info.pk_names(), None);
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {clock_q} (
            {pk_defs},
            \"__crr_col_name\" TEXT NOT NULL,
            \"__crr_col_version\" INTEGER NOT NULL,
            \"__crr_db_version\" INTEGER NOT NULL,
            \"__crr_site_id\" BLOB NOT NULL,
            \"__crr_seq\" INTEGER NOT NULL,
            \"__crr_local_version\" INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY ({pk_list}, \"__crr_col_name\")
        ) WITHOUT ROWID;
        CREATE INDEX IF NOT EXISTS {idx} ON {clock_q} (\"__crr_local_version\");",
        clock_q = quote_ident(&clock),
        idx = quote_ident(&format!("{clock}_lv_idx")),
    ))
    .map_err(|e| to_storage_err(e.to_string()))
}

/// Verify an existing clock table has the layout this engine writes.
pub fn check_clock_layout(conn: &Connection, info: &TableInfo) -> CrrResult<()> {
    let clock = clock_table_name(&info.name);
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(|e| to_storage_err(e.to_string()))?;
    let actual: Vec<String> = stmt
        .query_map([&clock], |row| row.get(0))
        .map_err(|e| to_storage_err(e.to_string()))?
        .collect::<Result<_, _>>()
        .map_err(|e| to_storage_err(e.to_string()))?;

    if !actual.iter().any(|c| c == "__crr_local_version") {
        return Err(CrrError::Incompatible {
            table: info.name.clone(),
            reason: format!("clock table {clock} predates the current layout; run maybe_update_db first"),
        });
    }

    let expected: Vec<String> = info
        .pk_names()
        .into_iter()
        .chain(CLOCK_META_COLUMNS.iter().map(|c| c.to_string()))
        .collect();
    if actual != expected {
        return Err(CrrError::Incompatible {
            table: info.name.clone(),
            reason: format!(
                "clock table {clock} has columns [{}], expected [{}]",
                actual.join(", "),
                expected.join(", ")
            ),
        });
    }
    Ok(())
}

pub fn drop_clock_table(conn: &Connection, table: &str) -> CrrResult<()> {
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {}",
        quote_ident(&clock_table_name(table))
    ))
    .map_err(|e| to_storage_err(e.to_string()))
}

/// Delete clock entries for columns no longer present on the base table.
pub fn prune_removed_columns(conn: &Connection, info: &TableInfo) -> CrrResult<usize> {
    let mut keep = vec![quote_literal(SENTINEL_COLUMN)];
    keep.extend(info.non_pks.iter().map(|c| quote_literal(&c.name)));
    let removed = conn
        .execute(
            &format!(
                "DELETE FROM {} WHERE \"__crr_col_name\" NOT IN ({})",
                quote_ident(&clock_table_name(&info.name)),
                keep.join(", ")
            ),
            [],
        )
        .map_err(|e| to_storage_err(e.to_string()))?;
    if removed > 0 {
        tracing::debug!(table = %info.name, removed, "pruned clock entries of dropped columns");
    }
    Ok(removed)
}

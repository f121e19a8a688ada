//! Preconditions a table must meet before it can become a CRR.

use rusqlite::Connection;

use crr_core::constants::{CLOCK_TABLE_SUFFIX, RESERVED_PREFIX};
use crr_core::errors::{CrrError, CrrResult};

use crate::table_info::pull_table_info;
use crate::to_storage_err;

fn incompatible(table: &str, reason: impl Into<String>) -> CrrError {
    CrrError::Incompatible {
        table: table.to_string(),
        reason: reason.into(),
    }
}

/// Check that `table` can be converted. The error names the first failing rule.
pub fn is_table_compatible(conn: &Connection, table: &str) -> CrrResult<()> {
    if table.ends_with(CLOCK_TABLE_SUFFIX) || table.starts_with("crr_") {
        return Err(incompatible(table, "engine bookkeeping tables cannot be CRRs"));
    }

    let info = pull_table_info(conn, table)?
        .ok_or_else(|| incompatible(table, "table does not exist"))?;

    if info.pks.is_empty() {
        return Err(incompatible(table, "table has no primary key"));
    }

    let all_columns = info.pks.iter().chain(&info.non_pks).chain(&info.hidden);
    if let Some(col) = all_columns.clone().find(|c| c.name.starts_with(RESERVED_PREFIX)) {
        return Err(incompatible(
            table,
            format!("column {} uses the reserved prefix {RESERVED_PREFIX}", col.name),
        ));
    }

    if let Some(col) = all_columns.clone().find(|c| c.is_generated()) {
        return Err(incompatible(
            table,
            format!("generated column {} cannot be replicated", col.name),
        ));
    }

    let unique_index: Option<String> = {
        let mut stmt = conn
            .prepare(
                "SELECT name FROM pragma_index_list(?1) WHERE \"unique\" = 1 AND origin != 'pk'",
            )
            .map_err(|e| to_storage_err(e.to_string()))?;
        let names: Vec<String> = stmt
            .query_map([table], |row| row.get(0))
            .map_err(|e| to_storage_err(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| to_storage_err(e.to_string()))?;
        names.into_iter().next()
    };
    if let Some(index) = unique_index {
        return Err(incompatible(
            table,
            format!("unique index {index} besides the primary key could be violated by merges"),
        ));
    }

    let foreign_keys: i64 = conn
        .query_row(
            "SELECT count(*) FROM pragma_foreign_key_list(?1)",
            [table],
            |row| row.get(0),
        )
        .map_err(|e| to_storage_err(e.to_string()))?;
    if foreign_keys > 0 {
        return Err(incompatible(
            table,
            "foreign key constraints cannot be enforced across merged rows",
        ));
    }

    if let Some(col) = info
        .non_pks
        .iter()
        .find(|c| c.not_null && c.default.is_none())
    {
        return Err(incompatible(
            table,
            format!("NOT NULL column {} has no DEFAULT value", col.name),
        ));
    }

    Ok(())
}

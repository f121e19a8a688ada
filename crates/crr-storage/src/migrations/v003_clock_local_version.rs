//! v003: clock tables gain `__crr_local_version`, the local DbVersion at which
//! each entry landed. Before v003 the authoring version doubled as the
//! cursor, so existing entries are seeded from `__crr_db_version`.

use rusqlite::Connection;

use crr_core::errors::CrrResult;

use super::add_column_if_missing;
use crate::catalog;
use crate::sql::{clock_table_name, quote_ident};
use crate::to_storage_err;

pub fn migrate(conn: &Connection) -> CrrResult<()> {
    for entry in catalog::list_crrs(conn)? {
        let clock = clock_table_name(&entry.table);
        let added = add_column_if_missing(
            conn,
            &clock,
            "__crr_local_version",
            "INTEGER NOT NULL DEFAULT 0",
        )?;
        if added {
            conn.execute_batch(&format!(
                "UPDATE {clock_q} SET \"__crr_local_version\" = \"__crr_db_version\";",
                clock_q = quote_ident(&clock)
            ))
            .map_err(|e| to_storage_err(e.to_string()))?;
            tracing::info!(table = %entry.table, "v003: seeded clock local versions");
        }
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {idx} ON {clock_q} (\"__crr_local_version\");",
            idx = quote_ident(&format!("{clock}_lv_idx")),
            clock_q = quote_ident(&clock)
        ))
        .map_err(|e| to_storage_err(e.to_string()))?;
    }
    Ok(())
}

//! Clock entries for rows that existed before tracking started.
//!
//! Every live row gets one entry per non-key column (or a sentinel when the
//! table has only key columns) at `col_version` 1, stamped with a fresh local
//! DbVersion. Rows that already have an entry are left alone, so a backfill
//! interrupted between batches resumes where it stopped.

use rusqlite::Connection;

use crr_core::constants::SENTINEL_COLUMN;
use crr_core::errors::CrrResult;

use crate::context::CrrContext;
use crate::conversion::clock_table::CLOCK_META_COLUMNS;
use crate::sql::{
    clock_table_name, ident_list, pk_match, quote_ident, quote_literal, with_savepoint,
};
use crate::table_info::TableInfo;
use crate::to_storage_err;

/// Backfill clock entries of `table`. Returns the number of entries written.
///
/// With `no_tx`, work is split into batches of `backfill_batch_size` rows per
/// column, each released on its own. Otherwise it runs in one savepoint, or
/// inline in the caller's transaction when `commit_alter` is set.
pub fn backfill_table(
    conn: &Connection,
    ctx: &CrrContext,
    table: &str,
    pk_columns: &[String],
    non_pk_columns: &[String],
    commit_alter: bool,
    no_tx: bool,
) -> CrrResult<usize> {
    let columns: Vec<&str> = if non_pk_columns.is_empty() {
        vec![SENTINEL_COLUMN]
    } else {
        non_pk_columns.iter().map(String::as_str).collect()
    };

    let run = |conn: &Connection, limit: Option<usize>| -> CrrResult<usize> {
        let mut written = 0;
        for column in &columns {
            written += backfill_column(conn, ctx, table, pk_columns, column, limit)?;
        }
        Ok(written)
    };

    let written = if no_tx {
        let batch = ctx.config().backfill_batch_size;
        let mut total = 0;
        loop {
            let n = with_savepoint(conn, "crr_backfill", |conn| run(conn, Some(batch)))?;
            if n == 0 {
                break;
            }
            total += n;
            tracing::debug!(table, batch = n, total, "backfill batch released");
        }
        total
    } else if commit_alter {
        run(conn, None)?
    } else {
        with_savepoint(conn, "crr_backfill", |conn| run(conn, None))?
    };

    if written > 0 {
        tracing::info!(table, written, "backfilled clock entries");
    }
    Ok(written)
}

fn backfill_column(
    conn: &Connection,
    ctx: &CrrContext,
    table: &str,
    pk_columns: &[String],
    column: &str,
    limit: Option<usize>,
) -> CrrResult<usize> {
    let base = quote_ident(table);
    let clock = quote_ident(&clock_table_name(table));
    let missing = format!(
        "FROM {base} AS b WHERE NOT EXISTS (
            SELECT 1 FROM {clock} AS c
             WHERE {matched} AND c.\"__crr_col_name\" = ?1)",
        matched = pk_match(pk_columns, Some("c"), "b"),
    );

    let any_missing: bool = conn
        .query_row(&format!("SELECT EXISTS(SELECT 1 {missing})"), [column], |row| row.get(0))
        .map_err(|e| to_storage_err(e.to_string()))?;
    if !any_missing {
        return Ok(0);
    }

    let version = ctx.clock().next();
    let site = ctx.site_id();
    let limit = limit.map(|n| format!(" LIMIT {n}")).unwrap_or_default();
    let sql = format!(
        "INSERT OR IGNORE INTO {clock} ({pks}, {meta})
         SELECT {b_pks}, ?1, 1, ?2, ?3, crr_increment_and_get_seq(), ?2 {missing}{limit}",
        pks = ident_list(pk_columns, None),
        meta = ident_list(&CLOCK_META_COLUMNS, None),
        b_pks = ident_list(pk_columns, Some("b")),
    );
    conn.execute(
        &sql,
        rusqlite::params![column, version, site.as_bytes().as_slice()],
    )
    .map_err(|e| to_storage_err(e.to_string()))
}

/// Tombstone every tracked row whose base row is gone.
///
/// Deletes made while tracking was suspended (between `begin_alter` and
/// `commit_alter`) left live clock entries behind. Each such key gets its
/// sentinel moved to the next even causal length and loses its column
/// entries, as the delete trigger would have done. Returns the rows tombstoned.
pub fn tombstone_missing_rows(
    conn: &Connection,
    ctx: &CrrContext,
    info: &TableInfo,
) -> CrrResult<usize> {
    let pks = info.pk_names();
    let base = quote_ident(&info.name);
    let clock_name = clock_table_name(&info.name);
    let clock = quote_ident(&clock_name);
    let sentinel = quote_literal(SENTINEL_COLUMN);
    let orphaned = format!(
        "SELECT DISTINCT {c_pks} FROM {clock} AS c
          WHERE NOT EXISTS (SELECT 1 FROM {base} AS b WHERE {base_match})
            AND NOT EXISTS (SELECT 1 FROM {clock} AS s
                             WHERE {sentinel_match} AND s.\"__crr_col_name\" = {sentinel}
                               AND s.\"__crr_col_version\" % 2 = 0)",
        c_pks = ident_list(&pks, Some("c")),
        base_match = pk_match(&pks, Some("b"), "c"),
        sentinel_match = pk_match(&pks, Some("s"), "c"),
    );

    let any: bool = conn
        .query_row(&format!("SELECT EXISTS({orphaned})"), [], |row| row.get(0))
        .map_err(|e| to_storage_err(e.to_string()))?;
    if !any {
        return Ok(0);
    }

    let version = ctx.clock().next();
    let tombstoned = conn
        .execute(
            &format!(
                "INSERT INTO {clock} ({pk_list}, {meta})
                 SELECT {k_pks}, {sentinel}, 2, ?1, ?2, crr_increment_and_get_seq(), ?1
                   FROM ({orphaned}) AS k WHERE 1
                 ON CONFLICT ({pk_list}, \"__crr_col_name\") DO UPDATE SET
                    \"__crr_col_version\" = \"__crr_col_version\" + (\"__crr_col_version\" % 2),
                    \"__crr_db_version\" = excluded.\"__crr_db_version\",
                    \"__crr_site_id\" = excluded.\"__crr_site_id\",
                    \"__crr_seq\" = excluded.\"__crr_seq\",
                    \"__crr_local_version\" = excluded.\"__crr_local_version\"",
                pk_list = ident_list(&pks, None),
                meta = ident_list(&CLOCK_META_COLUMNS, None),
                k_pks = ident_list(&pks, Some("k")),
            ),
            rusqlite::params![version, ctx.site_id().as_bytes().as_slice()],
        )
        .map_err(|e| to_storage_err(e.to_string()))?;

    conn.execute(
        &format!(
            "DELETE FROM {clock} WHERE \"__crr_col_name\" != {sentinel}
               AND NOT EXISTS (SELECT 1 FROM {base} AS b WHERE {base_match})",
            base_match = pk_match(&pks, Some("b"), &clock),
        ),
        [],
    )
    .map_err(|e| to_storage_err(e.to_string()))?;

    tracing::info!(table = %info.name, tombstoned, "tombstoned rows deleted while untracked");
    Ok(tombstoned)
}

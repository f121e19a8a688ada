//! Reading local change records above a version cursor.

use rusqlite::Connection;

use crr_core::constants::SENTINEL_COLUMN;
use crr_core::errors::CrrResult;
use crr_core::{ChangeRecord, Changeset, SiteId, Value};

use crate::catalog;
use crate::context::CrrContext;
use crate::sql::{
    clock_table_name, from_value_ref, ident_list, pk_match, quote_ident, quote_literal, read_err,
};
use crate::table_info::TableInfo;
use crate::to_storage_err;

/// Every clock entry that landed locally after `since`, with current cell
/// values and row causal lengths. Sentinel records come first, then cells,
/// each group ordered by local version then sequence.
///
/// Records authored by `exclude_site` are skipped; `until_version` still
/// covers them so the receiver's watermark moves past them.
pub fn changes_since(
    conn: &Connection,
    ctx: &CrrContext,
    since: i64,
    exclude_site: Option<&SiteId>,
) -> CrrResult<Changeset> {
    let mut rows: Vec<(i64, i64, ChangeRecord)> = Vec::new();
    let mut until = since;

    for entry in catalog::list_crrs(conn)? {
        let info = ctx.table_info(conn, &entry.table)?;
        for (local_version, seq, record) in read_table(conn, &info, since)? {
            until = until.max(local_version);
            if exclude_site.is_some_and(|s| *s == record.site_id) {
                continue;
            }
            rows.push((local_version, seq, record));
        }
    }

    // Sentinels lead so a receiver learns a row's life before its cells.
    rows.sort_by_key(|(local_version, seq, r)| (!r.is_sentinel(), *local_version, *seq));
    let changes: Vec<ChangeRecord> = rows.into_iter().map(|(_, _, r)| r).collect();
    tracing::debug!(since, until, count = changes.len(), "collected changes");
    Ok(Changeset::new(ctx.site_id(), until, changes))
}

fn read_table(
    conn: &Connection,
    info: &TableInfo,
    since: i64,
) -> CrrResult<Vec<(i64, i64, ChangeRecord)>> {
    let pks = info.pk_names();
    let base = quote_ident(&info.name);
    let clock = quote_ident(&clock_table_name(&info.name));
    let joined = pk_match(&pks, Some("b"), "c");

    let value_expr = if info.non_pks.is_empty() {
        "NULL".to_string()
    } else {
        let arms = info
            .non_pks
            .iter()
            .map(|col| {
                format!(
                    "WHEN {name} THEN (SELECT b.{col} FROM {base} AS b WHERE {joined})",
                    name = quote_literal(&col.name),
                    col = quote_ident(&col.name),
                )
            })
            .collect::<Vec<_>>()
            .join(" ");
        format!("CASE c.\"__crr_col_name\" {arms} ELSE NULL END")
    };

    let sql = format!(
        "SELECT {keys}, c.\"__crr_col_name\", c.\"__crr_col_version\", c.\"__crr_db_version\",
                c.\"__crr_site_id\", c.\"__crr_seq\", c.\"__crr_local_version\", {value_expr},
                COALESCE((SELECT s.\"__crr_col_version\" FROM {clock} AS s
                           WHERE {sentinel_match} AND s.\"__crr_col_name\" = {sentinel}), 1)
           FROM {clock} AS c
          WHERE c.\"__crr_local_version\" > ?1",
        keys = ident_list(&pks, Some("c")),
        sentinel_match = pk_match(&pks, Some("s"), "c"),
        sentinel = quote_literal(SENTINEL_COLUMN),
    );

    let n = pks.len();
    let mut stmt = conn.prepare(&sql).map_err(|e| to_storage_err(e.to_string()))?;
    let raw = stmt
        .query_map([since], |row| {
            let pk = (0..n)
                .map(|i| row.get_ref(i).and_then(from_value_ref))
                .collect::<Result<Vec<Value>, _>>()?;
            Ok((
                pk,
                row.get::<_, String>(n)?,
                row.get::<_, i64>(n + 1)?,
                row.get::<_, i64>(n + 2)?,
                row.get::<_, Vec<u8>>(n + 3)?,
                row.get::<_, i64>(n + 4)?,
                row.get::<_, i64>(n + 5)?,
                from_value_ref(row.get_ref(n + 6)?)?,
                row.get::<_, i64>(n + 7)?,
            ))
        })
        .map_err(|e| to_storage_err(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| read_err(&info.name, e))?;

    raw.into_iter()
        .map(|row| -> CrrResult<(i64, i64, ChangeRecord)> {
            let (pk, cid, col_version, db_version, site, seq, local_version, val, cl) = row;
            let record = ChangeRecord {
                table: info.name.clone(),
                pk,
                cid,
                val,
                col_version,
                db_version,
                site_id: SiteId::from_slice(&site)?,
                seq,
                cl,
            };
            Ok((local_version, seq, record))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crr_core::CrrConfig;

    use crate::conversion::create_crr;
    use crate::migrations::maybe_update_db;

    fn setup() -> (Connection, CrrContext) {
        let conn = Connection::open_in_memory().unwrap();
        maybe_update_db(&conn).unwrap();
        let ctx =
            CrrContext::attach(&conn, SiteId::from_bytes([3; 16]), CrrConfig::default()).unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, a TEXT, b TEXT)").unwrap();
        create_crr(&conn, &ctx, None, "t", false, false).unwrap();
        (conn, ctx)
    }

    #[test]
    fn cursor_skips_already_seen_versions() {
        let (conn, ctx) = setup();
        conn.execute("INSERT INTO t VALUES (1, 'x', 'y')", []).unwrap();
        let first = changes_since(&conn, &ctx, 0, None).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.until_version, ctx.db_version());

        conn.execute("UPDATE t SET b = 'z' WHERE id = 1", []).unwrap();
        let second = changes_since(&conn, &ctx, first.until_version, None).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second.changes[0].cid, "b");
        assert_eq!(second.changes[0].val, Value::from("z"));
        assert_eq!(second.changes[0].col_version, 2);
        assert_eq!(second.changes[0].cl, 1);
    }

    #[test]
    fn deleted_rows_surface_as_tombstones() {
        let (conn, ctx) = setup();
        conn.execute_batch("INSERT INTO t VALUES (1, 'x', 'y'); DELETE FROM t WHERE id = 1;")
            .unwrap();
        let cs = changes_since(&conn, &ctx, 0, None).unwrap();
        assert_eq!(cs.len(), 1);
        assert!(cs.changes[0].is_sentinel());
        assert_eq!(cs.changes[0].cl, 2);
        assert_eq!(cs.changes[0].val, Value::Null);
    }

    #[test]
    fn excluded_site_still_moves_cursor() {
        let (conn, ctx) = setup();
        conn.execute("INSERT INTO t VALUES (1, 'x', 'y')", []).unwrap();
        let own = ctx.site_id();
        let cs = changes_since(&conn, &ctx, 0, Some(&own)).unwrap();
        assert!(cs.is_empty());
        assert_eq!(cs.until_version, ctx.db_version());
    }
}

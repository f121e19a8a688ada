//! Merging remote change records into local state.
//!
//! Row liveness is settled first by causal length: a longer history always
//! wins, whether it deletes or revives the row. Within the same causal length
//! each cell is resolved independently by [`CellVersion::merge_cmp`]. Base
//! table writes happen with the sync bit set so the generated triggers stay
//! quiet; the clock entry is written directly with the record's authoring
//! metadata and a fresh local version.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

use crr_core::constants::{SENTINEL_COLUMN, SITE_ID_LEN, WIRE_FORMAT_VERSION};
use crr_core::errors::{CrrError, CrrResult};
use crr_core::{CellVersion, ChangeRecord, Changeset, MergeOutcome, PeerEvent, SiteId, Value};

use super::MergeReport;
use crate::context::CrrContext;
use crate::conversion::clock_table::clock_columns;
use crate::peers::record_peer_version;
use crate::sql::{
    clock_table_name, from_value_ref, ident_list, pk_bind_match, pk_match, quote_ident,
    read_err, to_sql_value, with_savepoint,
};
use crate::table_info::{ensure_table_infos_are_up_to_date, TableInfo};
use crate::to_storage_err;

/// Merge one record in its own savepoint.
pub fn merge_change(
    conn: &Connection,
    ctx: &CrrContext,
    change: &ChangeRecord,
) -> CrrResult<MergeOutcome> {
    let outcome = with_savepoint(conn, "crr_merge", |conn| merge_one(conn, ctx, change))?;
    if outcome.changed_state() {
        tracing::debug!(table = %change.table, cid = %change.cid, ?outcome, "record merged");
    }
    Ok(outcome)
}

/// Merge every record of `changeset` atomically, then advance the sender's
/// received watermark to `until_version`. Any failure leaves local state and
/// the watermark untouched.
pub fn apply_changeset(
    conn: &Connection,
    ctx: &CrrContext,
    changeset: &Changeset,
) -> CrrResult<MergeReport> {
    if changeset.format_version > WIRE_FORMAT_VERSION {
        return Err(CrrError::Wire {
            reason: format!(
                "changeset format {} is newer than supported {WIRE_FORMAT_VERSION}",
                changeset.format_version
            ),
        });
    }
    ensure_table_infos_are_up_to_date(conn, ctx)?;

    let report = with_savepoint(conn, "crr_apply", |conn| {
        let mut report = MergeReport::default();
        for change in &changeset.changes {
            report.record(merge_one(conn, ctx, change)?);
        }
        if changeset.sender != ctx.site_id() {
            record_peer_version(
                conn,
                &changeset.sender,
                PeerEvent::Received,
                changeset.until_version,
            )?;
        }
        Ok(report)
    })?;

    tracing::info!(
        sender = %changeset.sender,
        until_version = changeset.until_version,
        applied = report.applied,
        ignored = report.ignored,
        rows_deleted = report.rows_deleted,
        rows_resurrected = report.rows_resurrected,
        "changeset applied"
    );
    Ok(report)
}

pub(crate) fn merge_one(
    conn: &Connection,
    ctx: &CrrContext,
    change: &ChangeRecord,
) -> CrrResult<MergeOutcome> {
    let info = ctx.table_info(conn, &change.table)?;
    validate(&info, change)?;
    let target = Target::new(&info, change);

    let local_cl = target.causal_length(conn)?;
    let outcome = if change.cl < local_cl {
        MergeOutcome::Ignored
    } else if change.cl > local_cl {
        if change.is_tombstone() {
            target.delete_row(conn, ctx)?;
            target.clear_columns(conn)?;
            target.write_clock(conn, ctx, SENTINEL_COLUMN, change.cl, Authorship::of(change))?;
            MergeOutcome::RowDeleted
        } else {
            target.clear_columns(conn)?;
            target.ensure_row(conn, ctx)?;
            if change.is_sentinel() {
                target.write_clock(conn, ctx, SENTINEL_COLUMN, change.cl, Authorship::of(change))?;
            } else {
                if change.cl > 1 {
                    // The sentinel's own record supersedes this placeholder when it arrives.
                    let placeholder = Authorship::placeholder();
                    target.write_clock(conn, ctx, SENTINEL_COLUMN, change.cl, placeholder)?;
                }
                target.write_cell(conn, ctx)?;
            }
            if local_cl == 0 {
                MergeOutcome::Applied
            } else {
                MergeOutcome::RowResurrected
            }
        }
    } else if change.is_sentinel() || change.is_tombstone() {
        // Same history length: row state already agrees, only metadata may differ.
        if target.reconcile_sentinel(conn, ctx)? {
            MergeOutcome::Applied
        } else {
            MergeOutcome::Ignored
        }
    } else {
        match target.local_cell(conn)? {
            Some(local) if !change.cell_version().wins_over(&local) => MergeOutcome::Ignored,
            _ => {
                target.write_cell(conn, ctx)?;
                MergeOutcome::Applied
            }
        }
    };

    tracing::trace!(
        table = %change.table,
        cid = %change.cid,
        cl = change.cl,
        local_cl,
        ?outcome,
        "merged record"
    );
    Ok(outcome)
}

fn validate(info: &TableInfo, change: &ChangeRecord) -> CrrResult<()> {
    let invalid = |reason: String| CrrError::InvalidChange { reason };
    if change.pk.len() != info.pks.len() {
        return Err(invalid(format!(
            "{} expects {} key values, record has {}",
            info.name,
            info.pks.len(),
            change.pk.len()
        )));
    }
    if !change.is_sentinel() && !info.has_column(&change.cid) {
        return Err(invalid(format!("{} has no replicated column {}", info.name, change.cid)));
    }
    if change.cl < 1 || change.col_version < 1 {
        return Err(invalid(format!(
            "versions must be positive (cl {}, col_version {})",
            change.cl, change.col_version
        )));
    }
    if !change.is_sentinel() && change.is_tombstone() {
        return Err(invalid(format!(
            "column {} cannot carry an even causal length {}",
            change.cid, change.cl
        )));
    }
    if change.pk.iter().any(Value::is_null) {
        return Err(invalid(format!("{} key values cannot be NULL", info.name)));
    }
    Ok(())
}

/// Authoring metadata stored with a clock entry.
#[derive(Debug, Clone, Copy)]
struct Authorship {
    db_version: i64,
    site_id: SiteId,
    seq: i64,
}

impl Authorship {
    fn of(change: &ChangeRecord) -> Self {
        Self {
            db_version: change.db_version,
            site_id: change.site_id,
            seq: change.seq,
        }
    }

    /// Orders below any real authorship, so reconciliation always replaces it.
    fn placeholder() -> Self {
        Self {
            db_version: 0,
            site_id: SiteId::from_bytes([0; SITE_ID_LEN]),
            seq: 0,
        }
    }
}

/// The row a record addresses, with the SQL fragments to reach it.
struct Target<'a> {
    info: &'a TableInfo,
    change: &'a ChangeRecord,
    pks: Vec<String>,
    base: String,
    clock: String,
    keys: Vec<SqlValue>,
}

impl<'a> Target<'a> {
    fn new(info: &'a TableInfo, change: &'a ChangeRecord) -> Self {
        Self {
            info,
            change,
            pks: info.pk_names(),
            base: quote_ident(&info.name),
            clock: quote_ident(&clock_table_name(&info.name)),
            keys: change.pk.iter().map(to_sql_value).collect(),
        }
    }

    fn key_params(&self, extra: impl IntoIterator<Item = SqlValue>) -> Vec<SqlValue> {
        self.keys.iter().cloned().chain(extra).collect()
    }

    fn next_param(&self) -> usize {
        self.keys.len() + 1
    }

    /// Local causal length: the sentinel's version, else 1 if anything of the
    /// row is known, else 0.
    fn causal_length(&self, conn: &Connection) -> CrrResult<i64> {
        let sql = format!(
            "SELECT \"__crr_col_version\" FROM {clock} WHERE {matched} AND \"__crr_col_name\" = ?{n}",
            clock = self.clock,
            matched = pk_bind_match(&self.pks, None, 1),
            n = self.next_param(),
        );
        let sentinel: Option<i64> = conn
            .query_row(
                &sql,
                params_from_iter(self.key_params([SqlValue::Text(SENTINEL_COLUMN.to_string())])),
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| to_storage_err(e.to_string()))?;
        if let Some(cl) = sentinel {
            return Ok(cl);
        }

        let matched = pk_bind_match(&self.pks, None, 1);
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {clock} WHERE {matched})
                 OR EXISTS(SELECT 1 FROM {base} WHERE {matched})",
            clock = self.clock,
            base = self.base,
        );
        let known: bool = conn
            .query_row(&sql, params_from_iter(self.keys.iter()), |row| row.get(0))
            .map_err(|e| to_storage_err(e.to_string()))?;
        Ok(i64::from(known))
    }

    /// Local version and value of the addressed cell, if it has a clock entry.
    fn local_cell(&self, conn: &Connection) -> CrrResult<Option<CellVersion>> {
        let sql = format!(
            "SELECT c.\"__crr_col_version\", c.\"__crr_db_version\", c.\"__crr_site_id\", b.{col}
               FROM {clock} AS c LEFT JOIN {base} AS b ON {joined}
              WHERE {matched} AND c.\"__crr_col_name\" = ?{n}",
            col = quote_ident(&self.change.cid),
            clock = self.clock,
            base = self.base,
            joined = pk_match(&self.pks, Some("b"), "c"),
            matched = pk_bind_match(&self.pks, Some("c"), 1),
            n = self.next_param(),
        );
        let row = conn
            .query_row(
                &sql,
                params_from_iter(self.key_params([SqlValue::Text(self.change.cid.clone())])),
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        from_value_ref(row.get_ref(3)?)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| read_err(&self.info.name, e))?;
        match row {
            None => Ok(None),
            Some((col_version, db_version, site, value)) => Ok(Some(CellVersion::new(
                value,
                col_version,
                db_version,
                SiteId::from_slice(&site)?,
            ))),
        }
    }

    fn delete_row(&self, conn: &Connection, ctx: &CrrContext) -> CrrResult<()> {
        let _sync = ctx.sync_guard();
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE {}",
                self.base,
                pk_bind_match(&self.pks, None, 1)
            ),
            params_from_iter(self.keys.iter()),
        )
        .map_err(|e| to_storage_err(e.to_string()))?;
        Ok(())
    }

    /// Insert the key with column defaults if the row is absent.
    fn ensure_row(&self, conn: &Connection, ctx: &CrrContext) -> CrrResult<()> {
        let placeholders = (1..=self.keys.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let _sync = ctx.sync_guard();
        conn.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES ({placeholders}) ON CONFLICT DO NOTHING",
                self.base,
                ident_list(&self.pks, None)
            ),
            params_from_iter(self.keys.iter()),
        )
        .map_err(|e| to_storage_err(e.to_string()))?;
        Ok(())
    }

    /// Remove per-column entries; they belong to a row life that has ended.
    fn clear_columns(&self, conn: &Connection) -> CrrResult<()> {
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} AND \"__crr_col_name\" != ?{}",
                self.clock,
                pk_bind_match(&self.pks, None, 1),
                self.next_param()
            ),
            params_from_iter(self.key_params([SqlValue::Text(SENTINEL_COLUMN.to_string())])),
        )
        .map_err(|e| to_storage_err(e.to_string()))?;
        Ok(())
    }

    /// Write the cell value to the base table and its clock entry.
    fn write_cell(&self, conn: &Connection, ctx: &CrrContext) -> CrrResult<()> {
        let n = self.next_param();
        let placeholders = (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
        let col = quote_ident(&self.change.cid);
        {
            let _sync = ctx.sync_guard();
            conn.execute(
                &format!(
                    "INSERT INTO {base} ({keys}, {col}) VALUES ({placeholders})
                     ON CONFLICT ({keys}) DO UPDATE SET {col} = excluded.{col}",
                    base = self.base,
                    keys = ident_list(&self.pks, None),
                ),
                params_from_iter(self.key_params([to_sql_value(&self.change.val)])),
            )
            .map_err(|e| to_storage_err(e.to_string()))?;
        }
        self.write_clock(
            conn,
            ctx,
            &self.change.cid,
            self.change.col_version,
            Authorship::of(self.change),
        )
    }

    /// Upsert the clock entry for `cid` and stamp it with the next local version.
    fn write_clock(
        &self,
        conn: &Connection,
        ctx: &CrrContext,
        cid: &str,
        col_version: i64,
        author: Authorship,
    ) -> CrrResult<()> {
        let n = self.keys.len() + 6;
        let placeholders = (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "INSERT INTO {clock} ({columns}) VALUES ({placeholders})
             ON CONFLICT ({keys}, \"__crr_col_name\") DO UPDATE SET
                \"__crr_col_version\" = excluded.\"__crr_col_version\",
                \"__crr_db_version\" = excluded.\"__crr_db_version\",
                \"__crr_site_id\" = excluded.\"__crr_site_id\",
                \"__crr_seq\" = excluded.\"__crr_seq\",
                \"__crr_local_version\" = excluded.\"__crr_local_version\"",
            clock = self.clock,
            columns = clock_columns(self.info),
            keys = ident_list(&self.pks, None),
        );
        let params = self.key_params([
            SqlValue::Text(cid.to_string()),
            SqlValue::Integer(col_version),
            SqlValue::Integer(author.db_version),
            SqlValue::Blob(author.site_id.as_bytes().to_vec()),
            SqlValue::Integer(author.seq),
            SqlValue::Integer(ctx.clock().next()),
        ]);
        conn.execute(&sql, params_from_iter(params))
            .map_err(|e| to_storage_err(e.to_string()))?;
        Ok(())
    }

    /// Equal causal lengths: keep whichever sentinel metadata orders higher so
    /// every replica settles on the same entry. Returns whether it was replaced.
    fn reconcile_sentinel(&self, conn: &Connection, ctx: &CrrContext) -> CrrResult<bool> {
        let sql = format!(
            "SELECT \"__crr_col_version\", \"__crr_db_version\", \"__crr_site_id\"
               FROM {clock} WHERE {matched} AND \"__crr_col_name\" = ?{n}",
            clock = self.clock,
            matched = pk_bind_match(&self.pks, None, 1),
            n = self.next_param(),
        );
        let local = conn
            .query_row(
                &sql,
                params_from_iter(self.key_params([SqlValue::Text(SENTINEL_COLUMN.to_string())])),
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| to_storage_err(e.to_string()))?;

        let incoming = CellVersion::new(
            Value::Null,
            self.change.cl,
            self.change.db_version,
            self.change.site_id,
        );
        let wins = match local {
            None => self.change.is_sentinel(),
            Some((cl, db_version, site)) => {
                let site = SiteId::from_slice(&site)?;
                let local = CellVersion::new(Value::Null, cl, db_version, site);
                incoming.wins_over(&local)
            }
        };
        if wins {
            let author = Authorship::of(self.change);
            self.write_clock(conn, ctx, SENTINEL_COLUMN, self.change.cl, author)?;
        }
        Ok(wins)
    }
}

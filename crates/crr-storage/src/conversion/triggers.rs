//! Generated triggers that record local writes into the clock table.
//!
//! Each trigger runs only while the sync bit is clear, so merge and backfill
//! writes are not re-recorded as local edits. All entries written inside one
//! host transaction share the DbVersion returned by `crr_next_db_version()`.

use rusqlite::Connection;

use crr_core::constants::SENTINEL_COLUMN;
use crr_core::errors::CrrResult;

use super::clock_table::clock_columns;
use crate::sql::{clock_table_name, ident_list, pk_match, quote_ident, quote_literal};
use crate::table_info::TableInfo;
use crate::to_storage_err;

const META_VALUES: &str =
    "crr_next_db_version(), crr_site_id(), crr_increment_and_get_seq(), crr_next_db_version()";

const META_FROM_EXCLUDED: &str = "\"__crr_db_version\" = excluded.\"__crr_db_version\", \
     \"__crr_site_id\" = excluded.\"__crr_site_id\", \
     \"__crr_seq\" = excluded.\"__crr_seq\", \
     \"__crr_local_version\" = excluded.\"__crr_local_version\"";

const META_FRESH: &str = "\"__crr_db_version\" = crr_next_db_version(), \
     \"__crr_site_id\" = crr_site_id(), \
     \"__crr_seq\" = crr_increment_and_get_seq(), \
     \"__crr_local_version\" = crr_next_db_version()";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowEvent {
    Insert,
    Update,
    Delete,
}

impl RowEvent {
    pub const ALL: [RowEvent; 3] = [RowEvent::Insert, RowEvent::Update, RowEvent::Delete];

    fn suffix(self) -> &'static str {
        match self {
            RowEvent::Insert => "itrig",
            RowEvent::Update => "utrig",
            RowEvent::Delete => "dtrig",
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            RowEvent::Insert => "INSERT",
            RowEvent::Update => "UPDATE",
            RowEvent::Delete => "DELETE",
        }
    }

    pub fn trigger_name(self, table: &str) -> String {
        format!("{table}__crr_{}", self.suffix())
    }
}

/// Statement builders for one table's trigger bodies.
struct TriggerSql<'a> {
    info: &'a TableInfo,
    pks: Vec<String>,
    clock: String,
    columns: String,
    conflict: String,
}

impl<'a> TriggerSql<'a> {
    fn new(info: &'a TableInfo) -> Self {
        let pks = info.pk_names();
        let conflict = format!("({}, \"__crr_col_name\")", ident_list(&pks, None));
        Self {
            info,
            clock: quote_ident(&clock_table_name(&info.name)),
            columns: clock_columns(info),
            conflict,
            pks,
        }
    }

    /// `(NEW."a" IS NOT OLD."a" OR ...)`
    fn pk_changed(&self) -> String {
        let parts = self
            .pks
            .iter()
            .map(|p| {
                let c = quote_ident(p);
                format!("NEW.{c} IS NOT OLD.{c}")
            })
            .collect::<Vec<_>>()
            .join(" OR ");
        format!("({parts})")
    }

    /// Move a deleted row (even causal length) to its next live length.
    fn resurrect(&self, row: &str, cond: &str) -> String {
        format!(
            "UPDATE {clock} SET \"__crr_col_version\" = \"__crr_col_version\" + 1, {META_FRESH}
              WHERE {cond} AND {matched} AND \"__crr_col_name\" = {sentinel}
                AND \"__crr_col_version\" % 2 = 0;",
            clock = self.clock,
            matched = pk_match(&self.pks, None, row),
            sentinel = quote_literal(SENTINEL_COLUMN),
        )
    }

    /// Sentinel for tables with no non-key columns; the only record of the row.
    fn sentinel(&self, row: &str, cond: &str) -> String {
        format!(
            "INSERT INTO {clock} ({columns})
              SELECT {keys}, {sentinel}, 1, {META_VALUES} WHERE {cond}
              ON CONFLICT DO NOTHING;",
            clock = self.clock,
            columns = self.columns,
            keys = ident_list(&self.pks, Some(row)),
            sentinel = quote_literal(SENTINEL_COLUMN),
        )
    }

    fn bump_column(&self, column: &str, cond: &str) -> String {
        format!(
            "INSERT INTO {clock} ({columns})
              SELECT {keys}, {name}, 1, {META_VALUES} WHERE {cond}
              ON CONFLICT {conflict} DO UPDATE SET
                \"__crr_col_version\" = \"__crr_col_version\" + 1, {META_FROM_EXCLUDED};",
            clock = self.clock,
            columns = self.columns,
            keys = ident_list(&self.pks, Some("NEW")),
            name = quote_literal(column),
            conflict = self.conflict,
        )
    }

    /// Mark the OLD row deleted: causal length 2, or rounded up to the next even.
    fn tombstone(&self, cond: &str) -> String {
        format!(
            "INSERT INTO {clock} ({columns})
              SELECT {keys}, {sentinel}, 2, {META_VALUES} WHERE {cond}
              ON CONFLICT {conflict} DO UPDATE SET
                \"__crr_col_version\" = \"__crr_col_version\" + (\"__crr_col_version\" % 2),
                {META_FROM_EXCLUDED};",
            clock = self.clock,
            columns = self.columns,
            keys = ident_list(&self.pks, Some("OLD")),
            sentinel = quote_literal(SENTINEL_COLUMN),
            conflict = self.conflict,
        )
    }

    /// Drop per-column entries of the OLD row; only the sentinel survives a delete.
    fn clear_columns(&self, cond: &str) -> String {
        format!(
            "DELETE FROM {clock} WHERE {cond} AND {matched} AND \"__crr_col_name\" != {sentinel};",
            clock = self.clock,
            matched = pk_match(&self.pks, None, "OLD"),
            sentinel = quote_literal(SENTINEL_COLUMN),
        )
    }

    fn body(&self, event: RowEvent) -> String {
        let mut stmts = Vec::new();
        match event {
            RowEvent::Insert => {
                stmts.push(self.resurrect("NEW", "1"));
                if self.info.non_pks.is_empty() {
                    stmts.push(self.sentinel("NEW", "1"));
                }
                for col in &self.info.non_pks {
                    stmts.push(self.bump_column(&col.name, "1"));
                }
            }
            RowEvent::Update => {
                let changed = self.pk_changed();
                stmts.push(self.tombstone(&changed));
                stmts.push(self.clear_columns(&changed));
                stmts.push(self.resurrect("NEW", &changed));
                if self.info.non_pks.is_empty() {
                    stmts.push(self.sentinel("NEW", &changed));
                }
                for col in &self.info.non_pks {
                    let c = quote_ident(&col.name);
                    stmts.push(self.bump_column(
                        &col.name,
                        &format!("(NEW.{c} IS NOT OLD.{c} OR {changed})"),
                    ));
                }
            }
            RowEvent::Delete => {
                stmts.push(self.tombstone("1"));
                stmts.push(self.clear_columns("1"));
            }
        }
        stmts.join("\n")
    }

    fn create(&self, event: RowEvent) -> String {
        format!(
            "CREATE TRIGGER {name} AFTER {kw} ON {table}
             WHEN crr_internal_sync_bit() = 0
             BEGIN
             {body}
             END;",
            name = quote_ident(&event.trigger_name(&self.info.name)),
            kw = event.keyword(),
            table = quote_ident(&self.info.name),
            body = self.body(event),
        )
    }
}

/// SQL creating the trigger for `event` on `info`'s table.
pub fn trigger_sql(info: &TableInfo, event: RowEvent) -> String {
    TriggerSql::new(info).create(event)
}

pub fn create_triggers(conn: &Connection, info: &TableInfo) -> CrrResult<()> {
    let sql = TriggerSql::new(info);
    for event in RowEvent::ALL {
        conn.execute_batch(&sql.create(event))
            .map_err(|e| {
                to_storage_err(format!("creating {event:?} trigger on {}: {e}", info.name))
            })?;
    }
    Ok(())
}

/// Drop the three generated triggers of `table`, ignoring missing ones.
pub fn remove_crr_triggers_if_exist(conn: &Connection, table: &str) -> CrrResult<()> {
    for event in RowEvent::ALL {
        conn.execute_batch(&format!(
            "DROP TRIGGER IF EXISTS {}",
            quote_ident(&event.trigger_name(table))
        ))
        .map_err(|e| to_storage_err(e.to_string()))?;
    }
    Ok(())
}

//! Schema-stamped cache of `TableInfo`.
//!
//! The stamp is SQLite's `schema_version`, which the host bumps on every DDL
//! statement. A matching stamp means nothing structural changed since the
//! cache was filled; a moved stamp triggers a full re-check of every CRR.

use std::collections::HashMap;

use rusqlite::Connection;

use crr_core::errors::CrrResult;

use super::{pull_table_info, TableInfo};
use crate::context::CrrContext;
use crate::sql::{clock_table_name, quote_ident};
use crate::{catalog, conversion, to_storage_err};

#[derive(Debug, Default)]
pub struct TableInfoCache {
    stamp: Option<i64>,
    infos: HashMap<String, TableInfo>,
}

impl TableInfoCache {
    pub fn get(&self, table: &str) -> Option<&TableInfo> {
        self.infos.get(table)
    }

    pub fn insert(&mut self, info: TableInfo) {
        self.infos.insert(info.name.clone(), info);
    }

    pub fn remove(&mut self, table: &str) {
        self.infos.remove(table);
    }

    pub fn stamp(&self) -> Option<i64> {
        self.stamp
    }

    pub fn set_stamp(&mut self, stamp: i64) {
        self.stamp = Some(stamp);
    }

    /// Drop everything; the next access reloads from the schema.
    pub fn invalidate(&mut self) {
        self.stamp = None;
        self.infos.clear();
    }
}

pub fn schema_stamp(conn: &Connection) -> CrrResult<i64> {
    conn.pragma_query_value(None, "schema_version", |row| row.get(0))
        .map_err(|e| to_storage_err(e.to_string()))
}

/// Rebuild cached table infos if the schema moved, regenerating triggers and
/// clock entries for any CRR whose layout no longer matches its catalog hash.
/// CRRs whose base table disappeared have their bookkeeping removed.
///
/// Returns whether any CRR was regenerated or removed.
pub fn ensure_table_infos_are_up_to_date(conn: &Connection, ctx: &CrrContext) -> CrrResult<bool> {
    let stamp = schema_stamp(conn)?;
    if ctx.cache().stamp() == Some(stamp) {
        return Ok(false);
    }

    let mut changed = false;
    let mut fresh = Vec::new();
    for entry in catalog::list_crrs(conn)? {
        match pull_table_info(conn, &entry.table)? {
            None => {
                tracing::warn!(
                    table = %entry.table,
                    "CRR base table was dropped; removing its bookkeeping"
                );
                conn.execute_batch(&format!(
                    "DROP TABLE IF EXISTS {}",
                    quote_ident(&clock_table_name(&entry.table))
                ))
                .map_err(|e| to_storage_err(e.to_string()))?;
                catalog::remove(conn, &entry.table)?;
                catalog::write_version_floor(conn, ctx.db_version())?;
                changed = true;
            }
            Some(info) if info.fingerprint() != entry.schema_hash => {
                tracing::info!(
                    table = %entry.table,
                    "table layout changed; regenerating CRR triggers"
                );
                conversion::create_crr(conn, ctx, None, &entry.table, true, false)?;
                changed = true;
            }
            Some(info) => fresh.push(info),
        }
    }

    let mut cache = ctx.cache();
    cache.invalidate();
    for info in fresh {
        cache.insert(info);
    }
    cache.set_stamp(schema_stamp(conn)?);
    Ok(changed)
}

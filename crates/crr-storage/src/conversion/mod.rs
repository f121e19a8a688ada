//! Turning ordinary tables into CRRs and back.
//!
//! Conversion is idempotent: running it again on an unchanged table recreates
//! the same triggers and leaves the clock table untouched. After an ALTER,
//! `commit_alter` reruns it to pick up added and removed columns.

pub mod clock_table;
pub mod compatibility;
pub mod triggers;

pub use compatibility::is_table_compatible;
pub use triggers::{remove_crr_triggers_if_exist, RowEvent};

use rusqlite::Connection;

use crr_core::errors::{CrrError, CrrResult};

use crate::backfill::{backfill_table, tombstone_missing_rows};
use crate::catalog;
use crate::context::CrrContext;
use crate::migrations::create_schema_table_if_not_exists;
use crate::sql::{clock_table_name, object_exists, with_savepoint};
use crate::table_info::{pull_table_info, TableInfo};

/// Convert `table` into a CRR.
///
/// `commit_alter` marks a rerun after schema changes: a changed primary key
/// rebuilds the clock table and entries for dropped columns are pruned.
/// `no_tx` commits the backfill in bounded batches instead of one savepoint.
pub fn create_crr(
    conn: &Connection,
    ctx: &CrrContext,
    schema: Option<&str>,
    table: &str,
    commit_alter: bool,
    no_tx: bool,
) -> CrrResult<()> {
    if let Some(schema) = schema {
        if !schema.eq_ignore_ascii_case("main") {
            return Err(CrrError::Incompatible {
                table: table.to_string(),
                reason: format!("schema {schema} is not supported; CRRs live in main"),
            });
        }
    }

    create_schema_table_if_not_exists(conn)?;
    is_table_compatible(conn, table)?;
    let info = pull_table_info(conn, table)?.ok_or_else(|| CrrError::Incompatible {
        table: table.to_string(),
        reason: "table does not exist".to_string(),
    })?;
    let pks = info.pk_names();
    let non_pks = info.non_pk_names();

    let backfilled = if no_tx {
        with_savepoint(conn, "crr_create", |conn| {
            install_shadow_structures(conn, ctx, &info, commit_alter)
        })?;
        backfill_table(conn, ctx, table, &pks, &non_pks, false, true)?
    } else {
        with_savepoint(conn, "crr_create", |conn| {
            install_shadow_structures(conn, ctx, &info, commit_alter)?;
            backfill_table(conn, ctx, table, &pks, &non_pks, true, false)
        })?
    };

    tracing::info!(table, backfilled, commit_alter, "table is a CRR");
    ctx.cache().insert(info);
    Ok(())
}

fn install_shadow_structures(
    conn: &Connection,
    ctx: &CrrContext,
    info: &TableInfo,
    commit_alter: bool,
) -> CrrResult<()> {
    let pks = info.pk_names();

    if let Some(existing) = catalog::get(conn, &info.name)? {
        if existing.pk_columns != pks {
            if !commit_alter {
                return Err(CrrError::Incompatible {
                    table: info.name.clone(),
                    reason: format!(
                        "primary key changed from [{}] to [{}]; use begin_alter/commit_alter",
                        existing.pk_columns.join(", "),
                        pks.join(", ")
                    ),
                });
            }
            tracing::info!(table = %info.name, "primary key changed; rebuilding clock table");
            catalog::write_version_floor(conn, ctx.db_version())?;
            clock_table::drop_clock_table(conn, &info.name)?;
        }
    }

    if object_exists(conn, "table", &clock_table_name(&info.name))? {
        clock_table::check_clock_layout(conn, info)?;
    }

    remove_crr_triggers_if_exist(conn, &info.name)?;
    clock_table::create_clock_table(conn, info)?;
    if commit_alter {
        // Pruned entries may hold the highest local version; keep it as the floor.
        catalog::write_version_floor(conn, ctx.db_version())?;
        clock_table::prune_removed_columns(conn, info)?;
        tombstone_missing_rows(conn, ctx, info)?;
    }
    triggers::create_triggers(conn, info)?;
    catalog::upsert(conn, &info.name, &pks, &info.fingerprint())?;
    Ok(())
}

/// Stop tracking `table`. The base table and its rows are left in place.
pub fn drop_crr(conn: &Connection, ctx: &CrrContext, table: &str) -> CrrResult<()> {
    if !catalog::is_crr(conn, table)? {
        return Err(CrrError::UnknownTable {
            table: table.to_string(),
        });
    }
    with_savepoint(conn, "crr_drop", |conn| {
        remove_crr_triggers_if_exist(conn, table)?;
        clock_table::drop_clock_table(conn, table)?;
        catalog::remove(conn, table)?;
        catalog::write_version_floor(conn, ctx.db_version())
    })?;
    ctx.cache().remove(table);
    tracing::info!(table, "CRR dropped");
    Ok(())
}

/// Suspend change tracking on `table` ahead of schema changes.
///
/// Writes made between `begin_alter` and `commit_alter` are not recorded
/// individually; `commit_alter` backfills entries for any rows lacking them
/// and tombstones tracked rows that were deleted meanwhile.
pub fn begin_alter(conn: &Connection, table: &str) -> CrrResult<()> {
    if !catalog::is_crr(conn, table)? {
        return Err(CrrError::UnknownTable {
            table: table.to_string(),
        });
    }
    remove_crr_triggers_if_exist(conn, table)?;
    tracing::debug!(table, "alter started");
    Ok(())
}

/// Re-derive triggers and clock entries for `table` after schema changes.
pub fn commit_alter(
    conn: &Connection,
    ctx: &CrrContext,
    table: &str,
    no_tx: bool,
) -> CrrResult<()> {
    if !catalog::is_crr(conn, table)? {
        return Err(CrrError::UnknownTable {
            table: table.to_string(),
        });
    }
    create_crr(conn, ctx, None, table, true, no_tx)
}

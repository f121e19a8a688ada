//! Per-connection engine state.
//!
//! Everything the generated triggers and merge code need at runtime (site id,
//! logical clock, sync bit, table info cache) lives here and is threaded
//! explicitly through every call. Several replicas can therefore live in one
//! process, one context per connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

use crr_core::errors::{CrrError, CrrResult};
use crr_core::{CrrConfig, SiteId};

use crate::catalog;
use crate::clock::{fetch_db_version_from_storage, LogicalClock};
use crate::table_info::{pull_table_info, TableInfo, TableInfoCache};
use crate::to_storage_err;

/// Engine state bound to one open connection.
pub struct CrrContext {
    site_id: SiteId,
    clock: Arc<LogicalClock>,
    sync_bit: Arc<AtomicBool>,
    tables: Mutex<TableInfoCache>,
    config: CrrConfig,
}

impl CrrContext {
    /// Bind a context to `conn`: seed the clock from storage, register the
    /// SQL functions generated triggers call, and install transaction hooks.
    pub fn attach(conn: &Connection, site_id: SiteId, config: CrrConfig) -> CrrResult<Self> {
        let clock = Arc::new(LogicalClock::new(fetch_db_version_from_storage(conn)?));
        let sync_bit = Arc::new(AtomicBool::new(false));

        register_functions(conn, site_id, &clock, &sync_bit)?;

        let on_commit = Arc::clone(&clock);
        conn.commit_hook(Some(move || {
            on_commit.on_commit();
            false
        }));
        let on_rollback = Arc::clone(&clock);
        conn.rollback_hook(Some(move || on_rollback.on_rollback()));

        tracing::debug!(site_id = %site_id, db_version = clock.current(), "context attached");
        Ok(Self {
            site_id,
            clock,
            sync_bit,
            tables: Mutex::new(TableInfoCache::default()),
            config,
        })
    }

    pub fn site_id(&self) -> SiteId {
        self.site_id
    }

    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    /// Last committed DbVersion.
    pub fn db_version(&self) -> i64 {
        self.clock.current()
    }

    pub fn config(&self) -> &CrrConfig {
        &self.config
    }

    /// Suppress change tracking while the engine writes base rows itself.
    pub fn sync_guard(&self) -> SyncBitGuard<'_> {
        let previous = self.sync_bit.swap(true, Ordering::SeqCst);
        SyncBitGuard {
            bit: &self.sync_bit,
            previous,
        }
    }

    pub(crate) fn cache(&self) -> MutexGuard<'_, TableInfoCache> {
        // Cache contents are rebuildable; a poisoned lock only loses freshness.
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached layout of a CRR, loading it on a miss.
    pub fn table_info(&self, conn: &Connection, table: &str) -> CrrResult<TableInfo> {
        if let Some(info) = self.cache().get(table) {
            return Ok(info.clone());
        }
        if !catalog::is_crr(conn, table)? {
            return Err(CrrError::UnknownTable {
                table: table.to_string(),
            });
        }
        let info = pull_table_info(conn, table)?.ok_or_else(|| CrrError::UnknownTable {
            table: table.to_string(),
        })?;
        self.cache().insert(info.clone());
        Ok(info)
    }
}

/// Restores the previous sync bit when dropped.
pub struct SyncBitGuard<'a> {
    bit: &'a AtomicBool,
    previous: bool,
}

impl Drop for SyncBitGuard<'_> {
    fn drop(&mut self) {
        self.bit.store(self.previous, Ordering::SeqCst);
    }
}

fn register_functions(
    conn: &Connection,
    site_id: SiteId,
    clock: &Arc<LogicalClock>,
    sync_bit: &Arc<AtomicBool>,
) -> CrrResult<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_INNOCUOUS;

    let c = Arc::clone(clock);
    conn.create_scalar_function("crr_next_db_version", 0, flags, move |_| Ok(c.next()))
        .map_err(|e| to_storage_err(e.to_string()))?;

    let c = Arc::clone(clock);
    conn.create_scalar_function("crr_increment_and_get_seq", 0, flags, move |_| {
        Ok(c.next_seq())
    })
    .map_err(|e| to_storage_err(e.to_string()))?;

    let c = Arc::clone(clock);
    conn.create_scalar_function("crr_db_version", 0, flags, move |_| Ok(c.current()))
        .map_err(|e| to_storage_err(e.to_string()))?;

    conn.create_scalar_function(
        "crr_site_id",
        0,
        flags | FunctionFlags::SQLITE_DETERMINISTIC,
        move |_| Ok(site_id.as_bytes().to_vec()),
    )
    .map_err(|e| to_storage_err(e.to_string()))?;

    let bit = Arc::clone(sync_bit);
    conn.create_scalar_function("crr_internal_sync_bit", 0, flags, move |_| {
        Ok(i64::from(bit.load(Ordering::SeqCst)))
    })
    .map_err(|e| to_storage_err(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::create_schema_table_if_not_exists;

    fn attached() -> (Connection, CrrContext) {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_table_if_not_exists(&conn).unwrap();
        let ctx = CrrContext::attach(&conn, SiteId::from_bytes([5; 16]), CrrConfig::default())
            .unwrap();
        (conn, ctx)
    }

    #[test]
    fn functions_expose_context_state() {
        let (conn, ctx) = attached();
        let site: Vec<u8> = conn.query_row("SELECT crr_site_id()", [], |r| r.get(0)).unwrap();
        assert_eq!(site, ctx.site_id().as_bytes().to_vec());
        let bit: i64 = conn
            .query_row("SELECT crr_internal_sync_bit()", [], |r| r.get(0))
            .unwrap();
        assert_eq!(bit, 0);
        {
            let _guard = ctx.sync_guard();
            let bit: i64 = conn
                .query_row("SELECT crr_internal_sync_bit()", [], |r| r.get(0))
                .unwrap();
            assert_eq!(bit, 1);
        }
        let bit: i64 = conn
            .query_row("SELECT crr_internal_sync_bit()", [], |r| r.get(0))
            .unwrap();
        assert_eq!(bit, 0);
    }

    #[test]
    fn commit_hook_promotes_pending_version() {
        let (conn, ctx) = attached();
        conn.execute_batch("CREATE TABLE x (a)").unwrap();
        conn.execute_batch("BEGIN; INSERT INTO x VALUES (crr_next_db_version()); COMMIT;")
            .unwrap();
        assert_eq!(ctx.db_version(), 1);
        conn.execute_batch("BEGIN; INSERT INTO x VALUES (crr_next_db_version()); ROLLBACK;")
            .unwrap();
        assert_eq!(ctx.db_version(), 1);
        assert_eq!(ctx.clock().pending(), None);
    }

    #[test]
    fn unknown_table_is_reported() {
        let (conn, ctx) = attached();
        let err = ctx.table_info(&conn, "missing").unwrap_err();
        assert!(matches!(err, CrrError::UnknownTable { .. }));
    }
}

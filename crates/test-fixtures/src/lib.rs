//! Shared helpers for CRR integration tests: replica setup, pairwise sync,
//! state dumps for convergence checks, and golden wire fixtures.

use std::path::PathBuf;

use rusqlite::Connection;
use serde::de::DeserializeOwned;

use crr_core::errors::CrrResult;
use crr_core::Value;
use crr_storage::sql::{clock_table_name, quote_ident};
use crr_storage::{CrrEngine, MergeReport};

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory replica with `ddl` executed and each of `tables` converted.
///
/// # Panics
/// Panics if setup fails.
pub fn replica(ddl: &str, tables: &[&str]) -> CrrEngine {
    let engine = CrrEngine::open_in_memory().expect("open replica");
    engine.execute_batch(ddl).expect("run ddl");
    for table in tables {
        engine.create_crr(table).expect("convert table");
    }
    engine
}

/// Ship everything `to` has not yet acknowledged from `from`, then acknowledge it.
pub fn sync(from: &CrrEngine, to: &CrrEngine) -> CrrResult<MergeReport> {
    let changeset = from.changes_for_peer(&to.site_id())?;
    let report = to.apply_changeset(&changeset)?;
    from.acknowledge_sent(&to.site_id(), changeset.until_version)?;
    Ok(report)
}

/// Sync every ordered pair until a full round changes nothing.
pub fn sync_all(replicas: &[&CrrEngine]) -> CrrResult<()> {
    loop {
        let mut changed = 0;
        for from in replicas {
            for to in replicas {
                if from.site_id() != to.site_id() {
                    changed += sync(from, to)?.changed();
                }
            }
        }
        if changed == 0 {
            return Ok(());
        }
    }
}

fn collect_rows(conn: &Connection, sql: &str) -> CrrResult<Vec<Vec<Value>>> {
    let to_err = |e: rusqlite::Error| {
        crr_core::CrrError::Storage(crr_core::errors::StorageError::Sqlite {
            message: e.to_string(),
        })
    };
    let mut stmt = conn.prepare(sql).map_err(to_err)?;
    let width = stmt.column_count();
    let rows = stmt
        .query_map([], |row| {
            (0..width)
                .map(|i| row.get_ref(i).and_then(crr_storage::sql::from_value_ref))
                .collect::<Result<Vec<_>, _>>()
        })
        .map_err(to_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(to_err)?;
    Ok(rows)
}

/// All rows of `table`, ordered by every column.
pub fn dump_rows(engine: &CrrEngine, table: &str) -> CrrResult<Vec<Vec<Value>>> {
    engine.with_conn(|conn, ctx| {
        let info = ctx.table_info(conn, table)?;
        let width = info.pks.len() + info.non_pks.len();
        let order = (1..=width).map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
        collect_rows(conn, &format!("SELECT * FROM {} ORDER BY {order}", quote_ident(table)))
    })
}

/// Clock entries of `table` without local bookkeeping: key values, column,
/// col_version, authoring db_version and site. Ordered for comparison.
pub fn dump_clock(engine: &CrrEngine, table: &str) -> CrrResult<Vec<Vec<Value>>> {
    engine.with_conn(|conn, ctx| {
        let info = ctx.table_info(conn, table)?;
        let keys = info
            .pk_names()
            .iter()
            .map(|k| quote_ident(k))
            .collect::<Vec<_>>()
            .join(", ");
        collect_rows(
            conn,
            &format!(
                "SELECT {keys}, \"__crr_col_name\", \"__crr_col_version\", \"__crr_db_version\", \"__crr_site_id\"
                   FROM {} ORDER BY {keys}, \"__crr_col_name\"",
                quote_ident(&clock_table_name(table))
            ),
        )
    })
}

/// Number of clock entries of `table`.
pub fn clock_len(engine: &CrrEngine, table: &str) -> CrrResult<usize> {
    Ok(dump_clock(engine, table)?.len())
}

fn golden_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("golden")
}

pub fn fixture_path(relative_path: &str) -> PathBuf {
    golden_root().join(relative_path)
}

/// Load and deserialize a JSON fixture.
///
/// # Panics
/// Panics if the file doesn't exist or can't be deserialized.
pub fn load_fixture<T: DeserializeOwned>(relative_path: &str) -> T {
    let path = fixture_path(relative_path);
    let content = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read fixture {}: {}", path.display(), e));
    serde_json::from_str(&content)
        .unwrap_or_else(|e| panic!("Failed to parse fixture {}: {}", path.display(), e))
}

/// Raw text of a fixture file.
pub fn load_fixture_text(relative_path: &str) -> String {
    let path = fixture_path(relative_path);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read fixture {}: {}", path.display(), e))
}

//! Backfill completeness, replay, and resumption after interruption.

use crr_core::{CrrConfig, Value};
use crr_storage::{backfill_table, CrrEngine};
use test_fixtures::{clock_len, dump_clock};

const ROWS: usize = 25;

fn seeded(config: CrrConfig) -> CrrEngine {
    let engine = CrrEngine::open_in_memory_with_config(config).unwrap();
    engine
        .execute_batch(&format!(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, qty INTEGER, note TEXT);
             WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < {ROWS})
             INSERT INTO items SELECT i, 'item' || i, i * 2, NULL FROM n;"
        ))
        .unwrap();
    engine
}

fn rerun(engine: &CrrEngine, no_tx: bool) -> usize {
    engine
        .with_conn(|conn, ctx| {
            backfill_table(
                conn,
                ctx,
                "items",
                &["id".to_string()],
                &["name".to_string(), "qty".to_string(), "note".to_string()],
                false,
                no_tx,
            )
        })
        .unwrap()
}

#[test]
fn every_row_gets_one_entry_per_column() {
    let engine = seeded(CrrConfig::default());
    engine.create_crr("items").unwrap();

    let clock = dump_clock(&engine, "items").unwrap();
    assert_eq!(clock.len(), ROWS * 3);
    assert!(clock.iter().all(|r| r[2] == Value::Integer(1)));
    let site = Value::Blob(engine.site_id().as_bytes().to_vec());
    assert!(clock.iter().all(|r| r[4] == site));
    // All initial entries share the conversion's version.
    assert!(clock.iter().all(|r| r[3] == Value::Integer(engine.db_version())));

    assert_eq!(rerun(&engine, false), 0);
    assert_eq!(dump_clock(&engine, "items").unwrap(), clock);
}

#[test]
fn batched_conversion_matches_single_transaction() {
    let engine = seeded(CrrConfig {
        backfill_batch_size: 4,
        ..CrrConfig::default()
    });
    engine.create_crr_batched("items").unwrap();
    assert_eq!(clock_len(&engine, "items").unwrap(), ROWS * 3);
    assert_eq!(rerun(&engine, true), 0);
}

#[test]
fn interrupted_backfill_resumes_without_duplicates() {
    let engine = seeded(CrrConfig {
        backfill_batch_size: 3,
        ..CrrConfig::default()
    });
    engine.create_crr("items").unwrap();
    let untouched: Vec<_> = dump_clock(&engine, "items")
        .unwrap()
        .into_iter()
        .filter(|r| r[0] <= Value::Integer(10))
        .collect();

    // Simulate a batch run that stopped after the first ten rows.
    engine
        .execute_batch("DELETE FROM \"items__crr_clock\" WHERE id > 10")
        .unwrap();
    assert_eq!(clock_len(&engine, "items").unwrap(), 30);

    assert_eq!(rerun(&engine, true), (ROWS - 10) * 3);
    let clock = dump_clock(&engine, "items").unwrap();
    assert_eq!(clock.len(), ROWS * 3);
    let kept: Vec<_> = clock
        .into_iter()
        .filter(|r| r[0] <= Value::Integer(10))
        .collect();
    assert_eq!(kept, untouched);
}

#[test]
fn inline_backfill_rolls_back_with_enclosing_transaction() {
    let engine = seeded(CrrConfig::default());
    engine.create_crr("items").unwrap();
    engine
        .execute_batch("DELETE FROM \"items__crr_clock\" WHERE \"__crr_col_name\" = 'note'")
        .unwrap();

    engine
        .with_conn(|conn, ctx| {
            conn.execute_batch("BEGIN").unwrap();
            let written = backfill_table(
                conn,
                ctx,
                "items",
                &["id".to_string()],
                &["name".to_string(), "qty".to_string(), "note".to_string()],
                true,
                false,
            )?;
            assert_eq!(written, ROWS);
            conn.execute_batch("ROLLBACK").unwrap();
            Ok(())
        })
        .unwrap();
    assert_eq!(clock_len(&engine, "items").unwrap(), ROWS * 2);
}

#[test]
fn composite_keys_are_backfilled() {
    let engine = CrrEngine::open_in_memory().unwrap();
    engine
        .execute_batch(
            "CREATE TABLE pairs (a TEXT, b INTEGER, v TEXT, PRIMARY KEY (a, b));
             INSERT INTO pairs VALUES ('x', 1, 'p'), ('x', 2, 'q'), ('y', 1, 'r');",
        )
        .unwrap();
    engine.create_crr("pairs").unwrap();
    let clock = dump_clock(&engine, "pairs").unwrap();
    assert_eq!(clock.len(), 3);
    assert_eq!(clock[1][0], Value::from("x"));
    assert_eq!(clock[1][1], Value::Integer(2));
    assert_eq!(clock[1][2], Value::from("v"));
}

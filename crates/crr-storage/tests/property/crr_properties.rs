use proptest::prelude::*;

use crr_storage::CrrEngine;
use test_fixtures::{dump_clock, dump_rows, replica, sync, sync_all};

const TODO: &str = "CREATE TABLE todo (id INTEGER PRIMARY KEY, title TEXT, done INTEGER NOT NULL DEFAULT 0)";
const REPLICAS: usize = 3;

#[derive(Debug, Clone)]
enum Op {
    Insert { at: usize, id: i64, title: String },
    Retitle { at: usize, id: i64, title: String },
    Toggle { at: usize, id: i64 },
    Delete { at: usize, id: i64 },
    Rekey { at: usize, from: i64, to: i64 },
    Sync { from: usize, to: usize },
}

fn op() -> impl Strategy<Value = Op> {
    let at = 0..REPLICAS;
    let id = 0..4i64;
    let title = "[a-c]{1,2}";
    prop_oneof![
        3 => (at.clone(), id.clone(), title)
            .prop_map(|(at, id, title)| Op::Insert { at, id, title }),
        2 => (at.clone(), id.clone(), title)
            .prop_map(|(at, id, title)| Op::Retitle { at, id, title }),
        1 => (at.clone(), id.clone()).prop_map(|(at, id)| Op::Toggle { at, id }),
        2 => (at.clone(), id.clone()).prop_map(|(at, id)| Op::Delete { at, id }),
        1 => (at.clone(), id.clone(), id).prop_map(|(at, from, to)| Op::Rekey { at, from, to }),
        3 => (at.clone(), at).prop_map(|(from, to)| Op::Sync { from, to }),
    ]
}

fn run(replicas: &[CrrEngine], op: &Op) {
    let sql = match op {
        Op::Insert { at, id, title } => (
            *at,
            format!("INSERT INTO todo (id, title) VALUES ({id}, '{title}') ON CONFLICT (id) DO NOTHING"),
        ),
        Op::Retitle { at, id, title } => (
            *at,
            format!("UPDATE todo SET title = '{title}' WHERE id = {id}"),
        ),
        Op::Toggle { at, id } => (*at, format!("UPDATE todo SET done = 1 - done WHERE id = {id}")),
        Op::Delete { at, id } => (*at, format!("DELETE FROM todo WHERE id = {id}")),
        Op::Rekey { at, from, to } => (
            *at,
            format!("UPDATE OR IGNORE todo SET id = {to} WHERE id = {from}"),
        ),
        Op::Sync { from, to } => {
            if from != to {
                sync(&replicas[*from], &replicas[*to]).unwrap();
            }
            return;
        }
    };
    replicas[sql.0].execute_batch(&sql.1).unwrap();
}

fn fresh() -> Vec<CrrEngine> {
    (0..REPLICAS).map(|_| replica(TODO, &["todo"])).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn replicas_converge_after_full_exchange(ops in prop::collection::vec(op(), 1..40)) {
        let replicas = fresh();
        for op in &ops {
            run(&replicas, op);
        }
        let refs: Vec<&CrrEngine> = replicas.iter().collect();
        sync_all(&refs).unwrap();

        let rows = dump_rows(&replicas[0], "todo").unwrap();
        let clock = dump_clock(&replicas[0], "todo").unwrap();
        for other in &replicas[1..] {
            prop_assert_eq!(&dump_rows(other, "todo").unwrap(), &rows);
            prop_assert_eq!(&dump_clock(other, "todo").unwrap(), &clock);
        }
    }

    #[test]
    fn record_order_and_redelivery_do_not_matter(ops in prop::collection::vec(op(), 1..30)) {
        // All edits happen on the first replica; the others only receive.
        let source = fresh();
        for op in &ops {
            let local = match op {
                Op::Sync { .. } => continue,
                Op::Insert { id, title, .. } => Op::Insert { at: 0, id: *id, title: title.clone() },
                Op::Retitle { id, title, .. } => Op::Retitle {
                    at: 0,
                    id: *id,
                    title: title.clone(),
                },
                Op::Toggle { id, .. } => Op::Toggle { at: 0, id: *id },
                Op::Delete { id, .. } => Op::Delete { at: 0, id: *id },
                Op::Rekey { from, to, .. } => Op::Rekey { at: 0, from: *from, to: *to },
            };
            run(&source, &local);
        }
        let changeset = source[0].changes_since(0).unwrap();

        let forward = &source[1];
        forward.apply_changeset(&changeset).unwrap();
        let once = (dump_rows(forward, "todo").unwrap(), dump_clock(forward, "todo").unwrap());
        let again = forward.apply_changeset(&changeset).unwrap();
        prop_assert_eq!(again.changed(), 0);
        prop_assert_eq!(
            (dump_rows(forward, "todo").unwrap(), dump_clock(forward, "todo").unwrap()),
            once.clone()
        );

        let mut reversed = changeset.clone();
        reversed.changes.reverse();
        let backward = &source[2];
        backward.apply_changeset(&reversed).unwrap();
        prop_assert_eq!(
            (dump_rows(backward, "todo").unwrap(), dump_clock(backward, "todo").unwrap()),
            once
        );
        prop_assert_eq!(
            dump_rows(&source[0], "todo").unwrap(),
            dump_rows(forward, "todo").unwrap()
        );
    }
}

use std::cmp::Ordering;

use proptest::prelude::*;

use crr_core::{compare_values, CellVersion, SiteId, Value};

fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i64>().prop_map(Value::Integer),
        any::<f64>().prop_map(Value::Real),
        ".{0,8}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Value::Blob),
    ]
}

fn cell() -> impl Strategy<Value = CellVersion> {
    (value(), 1..4i64, 1..4i64, 0..3u8).prop_map(|(v, cv, dv, s)| {
        CellVersion::new(v, cv, dv, SiteId::from_bytes([s; 16]))
    })
}

proptest! {
    #[test]
    fn comparison_is_antisymmetric(a in value(), b in value()) {
        prop_assert_eq!(compare_values(&a, &b), compare_values(&b, &a).reverse());
    }

    #[test]
    fn comparison_is_reflexive(a in value()) {
        prop_assert_eq!(compare_values(&a, &a), Ordering::Equal);
    }

    #[test]
    fn comparison_is_transitive(a in value(), b in value(), c in value()) {
        let mut sorted = [a, b, c];
        sorted.sort_by(compare_values);
        prop_assert_ne!(compare_values(&sorted[0], &sorted[1]), Ordering::Greater);
        prop_assert_ne!(compare_values(&sorted[1], &sorted[2]), Ordering::Greater);
        prop_assert_ne!(compare_values(&sorted[0], &sorted[2]), Ordering::Greater);
    }

    #[test]
    fn type_rank_dominates(a in value(), b in value()) {
        if a.type_rank() != b.type_rank() {
            prop_assert_eq!(compare_values(&a, &b), a.type_rank().cmp(&b.type_rank()));
        }
    }

    #[test]
    fn cell_merge_order_does_not_matter(a in cell(), b in cell(), c in cell()) {
        let mut left = a.clone();
        left.merge(&b);
        left.merge(&c);

        let mut right = c;
        right.merge(&a);
        right.merge(&b);

        prop_assert_eq!(left.merge_cmp(&right), Ordering::Equal);
    }

    #[test]
    fn merging_twice_changes_nothing(a in cell(), b in cell()) {
        let mut once = a.clone();
        once.merge(&b);
        let mut twice = once.clone();
        twice.merge(&b);
        prop_assert_eq!(once.merge_cmp(&twice), Ordering::Equal);
    }
}

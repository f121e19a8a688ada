//! Dynamically typed cell values and their replica-independent total order.
//!
//! The order ranks by type first (`Null < Integer < Real < Text < Blob`) and
//! compares within a type by numeric value or raw bytes. Reals use IEEE-754
//! `total_cmp`, so NaN and signed zeros order the same way on every platform.
//!
//! # Examples
//!
//! ```
//! use std::cmp::Ordering;
//! use crr_core::{compare_values, Value};
//!
//! assert_eq!(compare_values(&Value::Null, &Value::Integer(0)), Ordering::Less);
//! assert_eq!(compare_values(&Value::Integer(9), &Value::Real(0.5)), Ordering::Less);
//! assert_eq!(
//!     compare_values(&Value::Text("b".into()), &Value::Text("a".into())),
//!     Ordering::Greater
//! );
//! ```

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single cell value as stored by the host engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Position of this value's type in the cross-type order.
    pub fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Integer(_) => 1,
            Value::Real(_) => 2,
            Value::Text(_) => 3,
            Value::Blob(_) => 4,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Compare two cell values under the replica-independent total order.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Integer(l), Value::Integer(r)) => l.cmp(r),
        (Value::Real(l), Value::Real(r)) => l.total_cmp(r),
        (Value::Text(l), Value::Text(r)) => l.as_bytes().cmp(r.as_bytes()),
        (Value::Blob(l), Value::Blob(r)) => l.as_slice().cmp(r.as_slice()),
        _ => a.type_rank().cmp(&b.type_rank()),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        compare_values(self, other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(self, other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_rank_orders_across_types() {
        let ordered = [
            Value::Null,
            Value::Integer(i64::MAX),
            Value::Real(f64::NEG_INFINITY),
            Value::Text(String::new()),
            Value::Blob(Vec::new()),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(compare_values(&pair[0], &pair[1]), Ordering::Less);
        }
    }

    #[test]
    fn text_compares_bytewise_not_by_locale() {
        // 'Z' (0x5A) sorts before 'a' (0x61) bytewise.
        assert_eq!(
            compare_values(&Value::from("Zebra"), &Value::from("apple")),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::from("é"), &Value::from("z")),
            Ordering::Greater
        );
    }

    #[test]
    fn nan_has_a_fixed_position() {
        let nan = Value::Real(f64::NAN);
        assert_eq!(compare_values(&nan, &nan), Ordering::Equal);
        assert_eq!(
            compare_values(&Value::Real(f64::INFINITY), &nan),
            Ordering::Less
        );
    }

    #[test]
    fn blob_prefix_sorts_first() {
        assert_eq!(
            compare_values(&Value::Blob(vec![1, 2]), &Value::Blob(vec![1, 2, 0])),
            Ordering::Less
        );
    }

    #[test]
    fn option_converts_to_null() {
        assert!(Value::from(None::<i64>).is_null());
        assert_eq!(Value::from(Some(3_i64)), Value::Integer(3));
    }
}

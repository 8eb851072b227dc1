// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Dynamic value model for mutable graphs.
//!
//! [`DynValue`] is the payload of dynamic vertices, edges, and vertex ids.
//! It carries a *total* order and a hash consistent with it so values can
//! key property maps and sort deterministically on every rank: variants
//! order by kind (null < bool < int < float < string < list < map), floats
//! compare by `total_cmp`, and `Int(3)` and `Float(3.0)` are distinct
//! values.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// One dynamic value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DynValue {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Ordered list.
    List(Vec<DynValue>),
    /// String-keyed map (deterministic iteration order).
    Map(BTreeMap<String, DynValue>),
}

impl DynValue {
    fn kind_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Float(_) => 3,
            Self::Str(_) => 4,
            Self::List(_) => 5,
            Self::Map(_) => 6,
        }
    }

    /// True for [`DynValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer payload, if this is an `Int`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric payload widened to `f64` (`Int` or `Float`).
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// String payload, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean payload, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Feed the canonical byte form of this value to a blake3 hasher.
    ///
    /// The encoding is the identity the hash/ordering contract and the
    /// oid partitioner agree on: a kind tag byte, then the payload
    /// (integers little-endian, floats by bit pattern, strings raw,
    /// containers length-prefixed and element-recursive).
    pub(crate) fn feed(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&[self.kind_rank()]);
        match self {
            Self::Null => {}
            Self::Bool(b) => {
                hasher.update(&[u8::from(*b)]);
            }
            Self::Int(v) => {
                hasher.update(&v.to_le_bytes());
            }
            Self::Float(v) => {
                hasher.update(&v.to_bits().to_le_bytes());
            }
            Self::Str(s) => {
                hasher.update(&(s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            Self::List(items) => {
                hasher.update(&(items.len() as u64).to_le_bytes());
                for item in items {
                    item.feed(hasher);
                }
            }
            Self::Map(entries) => {
                hasher.update(&(entries.len() as u64).to_le_bytes());
                for (k, v) in entries {
                    hasher.update(&(k.len() as u64).to_le_bytes());
                    hasher.update(k.as_bytes());
                    v.feed(hasher);
                }
            }
        }
    }

    /// Owning fragment id of this value when used as a vertex id.
    ///
    /// Deterministic across ranks: blake3 over the canonical byte form,
    /// reduced modulo the fragment count.
    #[allow(clippy::cast_possible_truncation)] // bounded by the modulus
    pub fn partition(&self, fnum: u32) -> u32 {
        let mut hasher = blake3::Hasher::new();
        self.feed(&mut hasher);
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        (u64::from_le_bytes(head) % u64::from(fnum.max(1))) as u32
    }

    /// Build from parsed JSON.
    ///
    /// Integers stay integral when they fit `i64`; everything else
    /// numeric becomes `Float`.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => n.as_i64().map_or_else(
                || Self::Float(n.as_f64().unwrap_or(f64::NAN)),
                Self::Int,
            ),
            serde_json::Value::String(s) => Self::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Self::List(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Render as JSON. Non-finite floats flatten to `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(v) => serde_json::Value::Number((*v).into()),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for DynValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DynValue {}

impl PartialOrd for DynValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DynValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::List(a), Self::List(b)) => a.cmp(b),
            (Self::Map(a), Self::Map(b)) => a.cmp(b),
            (a, b) => a.kind_rank().cmp(&b.kind_rank()),
        }
    }
}

impl Hash for DynValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.kind_rank());
        match self {
            Self::Null => {}
            Self::Bool(b) => state.write_u8(u8::from(*b)),
            Self::Int(v) => state.write_i64(*v),
            Self::Float(v) => state.write_u64(v.to_bits()),
            Self::Str(s) => s.hash(state),
            Self::List(items) => {
                state.write_u64(items.len() as u64);
                for item in items {
                    item.hash(state);
                }
            }
            Self::Map(entries) => {
                state.write_u64(entries.len() as u64);
                for (k, v) in entries {
                    k.hash(state);
                    v.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for DynValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            other => {
                let rendered =
                    serde_json::to_string(&other.to_json()).map_err(|_| fmt::Error)?;
                f.write_str(&rendered)
            }
        }
    }
}

impl From<i64> for DynValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for DynValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for DynValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for DynValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(v: &DynValue) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    }

    #[test]
    fn kinds_order_ints_before_strings() {
        // Given: mixed vertex ids.
        let mut oids = vec![
            DynValue::from("b"),
            DynValue::from(10i64),
            DynValue::from("a"),
            DynValue::from(-3i64),
        ];
        oids.sort();
        // Expect: ints in natural order, then strings in natural order.
        assert_eq!(
            oids,
            vec![
                DynValue::from(-3i64),
                DynValue::from(10i64),
                DynValue::from("a"),
                DynValue::from("b"),
            ]
        );
    }

    #[test]
    fn int_and_float_of_equal_magnitude_stay_distinct() {
        assert_ne!(DynValue::Int(3), DynValue::Float(3.0));
        assert_ne!(hash_of(&DynValue::Int(3)), hash_of(&DynValue::Float(3.0)));
    }

    #[test]
    fn nan_equals_itself_under_the_total_order() {
        let nan = DynValue::Float(f64::NAN);
        assert_eq!(nan, nan.clone());
        assert_eq!(hash_of(&nan), hash_of(&nan.clone()));
    }

    #[test]
    fn json_bridge_round_trips_structured_values() {
        let raw = serde_json::json!({
            "name": "v7",
            "weight": 2.5,
            "hops": [1, 2, 3],
            "meta": { "active": true, "note": null }
        });
        let value = DynValue::from_json(&raw);
        assert_eq!(value.to_json(), raw);
        match &value {
            DynValue::Map(m) => {
                assert_eq!(m.get("weight"), Some(&DynValue::Float(2.5)));
                assert_eq!(
                    m.get("hops"),
                    Some(&DynValue::List(vec![
                        DynValue::Int(1),
                        DynValue::Int(2),
                        DynValue::Int(3)
                    ]))
                );
            }
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn partition_is_stable_and_in_range() {
        let oids = [
            DynValue::from(0i64),
            DynValue::from(1i64),
            DynValue::from("left"),
            DynValue::from("right"),
        ];
        for oid in &oids {
            let fid = oid.partition(4);
            assert!(fid < 4);
            assert_eq!(fid, oid.partition(4));
        }
        // Single-fragment jobs own everything.
        assert!(oids.iter().all(|o| o.partition(1) == 0));
    }

    #[test]
    fn display_renders_strings_bare_and_the_rest_as_json() {
        assert_eq!(DynValue::from("v1").to_string(), "v1");
        assert_eq!(DynValue::Int(-4).to_string(), "-4");
        assert_eq!(
            DynValue::List(vec![DynValue::Int(1), DynValue::from("x")]).to_string(),
            "[1,\"x\"]"
        );
    }
}

//! Dynamically-typed values produced and consumed by rule evaluation.
//!
//! Lists and maps own their contents by value. Structural operations that need
//! a homogeneous list (sorting, slicing) leave the receiver untouched and
//! report failure instead of partially applying.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Structured rule value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Nil,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating-point number.
    Double(f64),
    /// UTF-8 text.
    String(String),
    /// Ordered sequence.
    List(Vec<Value>),
    /// Key-ordered string map.
    Map(BTreeMap<String, Value>),
}

/// Variant tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// [`Value::Nil`]
    Nil,
    /// [`Value::Bool`]
    Bool,
    /// [`Value::Int`]
    Int,
    /// [`Value::Double`]
    Double,
    /// [`Value::String`]
    String,
    /// [`Value::List`]
    List,
    /// [`Value::Map`]
    Map,
}

impl ValueKind {
    fn is_sortable(self) -> bool {
        matches!(self, ValueKind::Int | ValueKind::Double | ValueKind::String)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Nil => "nil",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Double => "double",
            ValueKind::String => "string",
            ValueKind::List => "list",
            ValueKind::Map => "map",
        };
        f.write_str(name)
    }
}

enum Uniformity {
    Empty,
    Uniform(ValueKind),
    Mixed,
}

fn uniformity<'a>(mut items: impl Iterator<Item = &'a Value>) -> Uniformity {
    let Some(first) = items.next() else {
        return Uniformity::Empty;
    };
    let kind = first.kind();
    if items.all(|item| item.kind() == kind) {
        Uniformity::Uniform(kind)
    } else {
        Uniformity::Mixed
    }
}

impl Value {
    /// Variant tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Nil => ValueKind::Nil,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Double(_) => ValueKind::Double,
            Value::String(_) => ValueKind::String,
            Value::List(_) => ValueKind::List,
            Value::Map(_) => ValueKind::Map,
        }
    }

    /// Whether this value carries the given variant tag.
    pub fn type_check(&self, kind: ValueKind) -> bool {
        self.kind() == kind
    }

    /// Look up `key` in a map. Absent for non-maps and missing keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Mutable variant of [`Value::get`].
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        match self {
            Value::Map(map) => map.get_mut(key),
            _ => None,
        }
    }

    /// Element at `position` of a list. Absent for non-lists and out-of-range positions.
    pub fn at(&self, position: usize) -> Option<&Value> {
        match self {
            Value::List(items) => items.get(position),
            _ => None,
        }
    }

    /// Mutable variant of [`Value::at`].
    pub fn at_mut(&mut self, position: usize) -> Option<&mut Value> {
        match self {
            Value::List(items) => items.get_mut(position),
            _ => None,
        }
    }

    /// Borrow the elements of a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the entries of a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(num) => Some(*num),
            _ => None,
        }
    }

    /// String payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    /// Number of elements in a list or map, or characters in a string.
    pub fn size(&self) -> Option<usize> {
        match self {
            Value::List(items) => Some(items.len()),
            Value::Map(map) => Some(map.len()),
            Value::String(text) => Some(text.chars().count()),
            _ => None,
        }
    }

    /// Whether this is a list whose elements all share one variant tag.
    pub fn is_uniform(&self) -> bool {
        match self {
            Value::List(items) => !matches!(uniformity(items.iter()), Uniformity::Mixed),
            _ => false,
        }
    }

    /// Project `key` out of every element of a list of maps.
    ///
    /// All-or-nothing: absent unless the receiver is a list of maps and every
    /// element holds `key`.
    pub fn slice(&self, key: &str) -> Option<Value> {
        let items = self.as_list()?;
        match uniformity(items.iter()) {
            Uniformity::Empty => Some(Value::List(Vec::new())),
            Uniformity::Uniform(ValueKind::Map) => items
                .iter()
                .map(|item| item.get(key).cloned())
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            _ => None,
        }
    }

    /// Sort a uniform list of ints, doubles or strings in ascending order.
    ///
    /// Returns `false` (leaving the receiver unchanged) for anything else.
    pub fn sort(&mut self) -> bool {
        let Value::List(items) = self else {
            return false;
        };
        let shape = uniformity(items.iter());
        match shape {
            Uniformity::Empty => true,
            Uniformity::Uniform(kind) if kind.is_sortable() => {
                items.sort_by(|a, b| a.compare(b).unwrap_or(Ordering::Equal));
                true
            }
            _ => false,
        }
    }

    /// Stable-sort a list of maps by the value each holds under `key`.
    ///
    /// Every element must be a map holding `key`, and the keyed values must be
    /// a uniform sortable kind; otherwise the receiver is left unchanged.
    pub fn sort_by_key(&mut self, key: &str) -> bool {
        let Value::List(items) = self else {
            return false;
        };
        let Some(keyed) = items
            .iter()
            .map(|item| item.get(key))
            .collect::<Option<Vec<_>>>()
        else {
            return false;
        };
        let shape = uniformity(keyed.into_iter());
        match shape {
            Uniformity::Empty => true,
            Uniformity::Uniform(kind) if kind.is_sortable() => {
                items.sort_by(|a, b| match (a.get(key), b.get(key)) {
                    (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                });
                true
            }
            _ => false,
        }
    }

    /// Reverse a list in place.
    pub fn reverse(&mut self) -> bool {
        match self {
            Value::List(items) => {
                items.reverse();
                true
            }
            _ => false,
        }
    }

    /// Shuffle a list in place with the supplied random source.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) -> bool {
        match self {
            Value::List(items) => {
                items.shuffle(rng);
                true
            }
            _ => false,
        }
    }

    /// Move every element of `other` to the end of this list, leaving `other` empty.
    pub fn extend(&mut self, other: &mut Value) -> bool {
        match (self, other) {
            (Value::List(items), Value::List(source)) => {
                items.append(source);
                true
            }
            _ => false,
        }
    }

    /// Remove `min(count, len)` elements from the tail of a list.
    pub fn discard(&mut self, count: usize) -> bool {
        match self {
            Value::List(items) => {
                let keep = items.len().saturating_sub(count);
                items.truncate(keep);
                true
            }
            _ => false,
        }
    }

    /// Move `min(count, len(from))` elements from the tail of `from` onto the
    /// end of this list, preserving their relative order.
    pub fn deal(&mut self, from: &mut Value, count: usize) -> bool {
        match (self, from) {
            (Value::List(items), Value::List(source)) => {
                let split = source.len().saturating_sub(count);
                let mut dealt = source.split_off(split);
                items.append(&mut dealt);
                true
            }
            _ => false,
        }
    }

    /// Append `value` to a list.
    pub fn push(&mut self, value: Value) -> bool {
        match self {
            Value::List(items) => {
                items.push(value);
                true
            }
            _ => false,
        }
    }

    /// Order two values, coercing between ints and doubles.
    ///
    /// Defined for numeric pairs and string pairs only.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
            (Value::Double(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality with numeric coercion. `None` when the pair is incomparable.
    pub fn equal(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a == b),
            _ => self.compare(other).map(|ord| ord == Ordering::Equal),
        }
    }

    /// Strict less-than with numeric coercion.
    pub fn less(&self, other: &Value) -> Option<bool> {
        self.compare(other).map(|ord| ord == Ordering::Less)
    }

    /// Strict greater-than with numeric coercion.
    pub fn greater(&self, other: &Value) -> Option<bool> {
        self.compare(other).map(|ord| ord == Ordering::Greater)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(flag) => Value::Bool(flag),
            serde_json::Value::Number(num) => match num.as_i64() {
                Some(int) => Value::Int(int),
                None => Value::Double(num.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(text) => Value::String(text),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::String(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::String(text)
    }
}

impl From<i64> for Value {
    fn from(num: i64) -> Self {
        Value::Int(num)
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Bool(flag)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(flag) => write!(f, "{}", flag),
            Value::Int(num) => write!(f, "{}", num),
            Value::Double(num) => write!(f, "{}", num),
            Value::String(text) => f.write_str(text),
            Value::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (idx, (key, value)) in map.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

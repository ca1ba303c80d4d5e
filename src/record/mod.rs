//! Record Module
//!
//! The minimal record model the lake stores: self-describing [`Value`]s,
//! [`Record`]s of named fields, and the pool [`Layout`] that orders them.
//!
//! ## Value Order
//! Values compare by type rank first, then by content. Numbers of different
//! widths compare numerically. `Null` sorts after everything else (nulls
//! max); a descending layout inverts the whole order.

pub mod codec;

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LakeError, Result};

pub use codec::{FrameReader, FrameWriter};

// =============================================================================
// Value
// =============================================================================

/// A single self-describing value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Nanoseconds since the unix epoch
    Time(i64),
    Record(Vec<(String, Value)>),
}

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) | Value::Uint(_) | Value::Float(_) => 1,
            Value::Time(_) => 2,
            Value::String(_) => 3,
            Value::Bytes(_) => 4,
            Value::Record(_) => 5,
            Value::Null => 6,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the value's type, as used by type index rules
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int64",
            Value::Uint(_) => "uint64",
            Value::Float(_) => "float64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Time(_) => "time",
            Value::Record(_) => "record",
        }
    }

    /// Approximate in-memory footprint, used for buffer accounting
    pub fn mem_size(&self) -> usize {
        match self {
            Value::String(s) => 8 + s.len(),
            Value::Bytes(b) => 8 + b.len(),
            Value::Record(fields) => fields
                .iter()
                .map(|(name, v)| name.len() + v.mem_size())
                .sum::<usize>()
                + 8,
            _ => 9,
        }
    }

    fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Int(i) => Some(*i as i128),
            Value::Uint(u) => Some(*u as i128),
            _ => None,
        }
    }

    fn as_float(&self) -> f64 {
        match self {
            Value::Float(f) => *f,
            _ => f64::NAN,
        }
    }

    fn cmp_numbers(&self, other: &Value) -> Ordering {
        match (self.as_integer(), other.as_integer()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(a), None) => cmp_int_float(a, other.as_float()),
            (None, Some(b)) => cmp_int_float(b, self.as_float()).reverse(),
            (None, None) => cmp_floats(self.as_float(), other.as_float()),
        }
    }
}

/// Floats compare numerically (`-0.0 == 0.0`); NaNs fall back to the
/// total order, which places them by sign beyond every number
fn cmp_floats(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b))
}

/// Exact comparison of an integer with a float, without rounding the
/// integer through `f64`
fn cmp_int_float(i: i128, f: f64) -> Ordering {
    // Every i64 and u64 lies strictly within this bound
    const LIMIT: f64 = 18_446_744_073_709_551_616.0;
    if f.is_nan() {
        return if f.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if f >= LIMIT {
        return Ordering::Less;
    }
    if f < -LIMIT {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i128)) {
        Ordering::Equal => 0.0f64.partial_cmp(&(f - whole)).unwrap_or(Ordering::Equal),
        ord => ord,
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_rank = self.rank().cmp(&other.rank());
        if by_rank != Ordering::Equal {
            return by_rank;
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Record(a), Value::Record(b)) => {
                for ((na, va), (nb, vb)) in a.iter().zip(b.iter()) {
                    let ord = na.cmp(nb).then_with(|| va.cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.cmp_numbers(other),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Uint(u) => write!(f, "{}", u),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => {
                f.write_str("0x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::Time(ns) => write!(f, "{}ns", ns),
            Value::Record(fields) => {
                f.write_str("{")?;
                for (i, (name, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}:{}", name, v)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

// =============================================================================
// Record
// =============================================================================

/// An ordered list of named fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field append
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a top-level field, replacing any previous value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Look up a possibly nested field
    pub fn get(&self, path: &KeyPath) -> Option<&Value> {
        let mut parts = path.0.iter();
        let first = parts.next()?;
        let mut current = self
            .fields
            .iter()
            .find(|(n, _)| n == first)
            .map(|(_, v)| v)?;
        for part in parts {
            match current {
                Value::Record(fields) => {
                    current = fields.iter().find(|(n, _)| n == part).map(|(_, v)| v)?;
                }
                _ => return None,
            }
        }
        Some(current)
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Visit every value in the record, nested ones included
    pub fn walk(&self, f: &mut impl FnMut(&Value)) {
        fn visit(v: &Value, f: &mut impl FnMut(&Value)) {
            f(v);
            if let Value::Record(fields) = v {
                for (_, inner) in fields {
                    visit(inner, f);
                }
            }
        }
        for (_, v) in &self.fields {
            visit(v, f);
        }
    }

    pub fn mem_size(&self) -> usize {
        self.fields
            .iter()
            .map(|(n, v)| n.len() + v.mem_size())
            .sum()
    }
}

// =============================================================================
// Layout
// =============================================================================

/// A dotted field path such as `id.orig_h`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    pub fn new(path: &str) -> Self {
        KeyPath(path.split('.').map(str::to_string).collect())
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl From<&str> for KeyPath {
    fn from(s: &str) -> Self {
        KeyPath::new(s)
    }
}

/// Scan direction of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    /// Map a natural (ascending) comparison into this order
    pub fn apply(self, ord: Ordering) -> Ordering {
        match self {
            Order::Asc => ord,
            Order::Desc => ord.reverse(),
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Order::Asc => f.write_str("asc"),
            Order::Desc => f.write_str("desc"),
        }
    }
}

static NULL_VALUE: Value = Value::Null;

/// Sort keys and direction shared by every data object in a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub order: Order,
    pub keys: Vec<KeyPath>,
}

impl Layout {
    /// A layout needs at least one key
    pub fn new(order: Order, keys: Vec<KeyPath>) -> Result<Self> {
        let layout = Self { order, keys };
        layout.validate()?;
        Ok(layout)
    }

    /// Reject layouts without keys, such as ones built field by field
    pub fn validate(&self) -> Result<()> {
        if self.keys.is_empty() {
            return Err(LakeError::InvalidArgument("layout has no keys".to_string()));
        }
        Ok(())
    }

    /// Parse `key[,key...][:asc|:desc]`; the order defaults to ascending
    pub fn parse(s: &str) -> Result<Self> {
        let (keys, order) = match s.rsplit_once(':') {
            Some((keys, "asc")) => (keys, Order::Asc),
            Some((keys, "desc")) => (keys, Order::Desc),
            Some((_, other)) => {
                return Err(LakeError::InvalidArgument(format!(
                    "unknown sort order {:?}",
                    other
                )))
            }
            None => (s, Order::Asc),
        };
        let keys: Vec<KeyPath> = keys
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(KeyPath::new)
            .collect();
        if keys.is_empty() {
            return Err(LakeError::InvalidArgument(format!(
                "layout {:?} has no keys",
                s
            )));
        }
        Ok(Self { order, keys })
    }

    /// The primary key path, `None` for a layout without keys
    pub fn primary(&self) -> Option<&KeyPath> {
        self.keys.first()
    }

    /// Value of the primary key, `Null` when the field is missing
    pub fn key_of(&self, rec: &Record) -> Value {
        self.primary()
            .and_then(|key| rec.get(key))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Compare two primary key values in pool order
    pub fn compare_values(&self, a: &Value, b: &Value) -> Ordering {
        self.order.apply(a.cmp(b))
    }

    /// Compare two records by every key in pool order
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for key in &self.keys {
            let va = a.get(key).unwrap_or(&NULL_VALUE);
            let vb = b.get(key).unwrap_or(&NULL_VALUE);
            let ord = va.cmp(vb);
            if ord != Ordering::Equal {
                return self.order.apply(ord);
            }
        }
        Ordering::Equal
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            order: Order::Desc,
            keys: vec![KeyPath::new("ts")],
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.keys.iter().map(|k| k.to_string()).collect();
        write!(f, "{}:{}", keys.join(","), self.order)
    }
}

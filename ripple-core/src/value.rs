//! Dynamic Values
//!
//! The observation layer works over a small closed set of value variants
//! rather than open-ended generics: primitives, an ordered list, an
//! insertion-ordered map, and an observed wrapper. Containers are shared
//! (`Arc`) so a wrapper and the code that created the raw value see the
//! same storage, and so container identity is well defined: the address
//! of the shared allocation is the key into the wrapper registries and
//! the dependency store.
//!
//! # Equality
//!
//! Two distinct comparisons exist on purpose:
//!
//! - [`PartialEq`] is structural for primitives and identity-based for
//!   containers. It is what tests and user code usually want.
//! - [`same_value`] is the write gate: it treats `NaN` as equal to
//!   itself and distinguishes `+0.0` from `-0.0` (bit comparison on
//!   floats). A write that stores a same-value is a no-op and triggers
//!   nothing.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::observe::Observed;

/// Shared storage for an ordered list container.
pub type RawList = Arc<RwLock<Vec<Value>>>;

/// Shared storage for an insertion-ordered record container.
pub type RawMap = Arc<RwLock<IndexMap<String, Value>>>;

/// Identity of a trackable location.
///
/// For containers this is the address of the shared allocation; signals
/// and computed cells derive their identity from their own inner
/// allocation. Identities are only meaningful while something keeps the
/// allocation alive, which the wrapper (or cell) itself guarantees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(usize);

impl TargetId {
    pub(crate) fn from_addr(addr: usize) -> Self {
        Self(addr)
    }

    /// Get the raw address value.
    pub fn raw(&self) -> usize {
        self.0
    }
}

/// A dynamic value.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(RawList),
    Map(RawMap),
    /// An observed wrapper around a container.
    Observed(Observed),
}

impl Value {
    /// Create an empty list container.
    pub fn list() -> Self {
        Value::List(Arc::new(RwLock::new(Vec::new())))
    }

    /// Create a list container from existing values.
    pub fn list_from<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Value::List(Arc::new(RwLock::new(values.into_iter().collect())))
    }

    /// Create an empty record container.
    pub fn map() -> Self {
        Value::Map(Arc::new(RwLock::new(IndexMap::new())))
    }

    /// Create a record container from key/value pairs.
    pub fn map_from<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(Arc::new(RwLock::new(
            pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        )))
    }

    /// Whether this value is a container (or a wrapper around one).
    pub fn is_container(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_) | Value::Observed(_))
    }

    /// The identity of the underlying raw container, if any.
    ///
    /// Wrappers report the identity of the raw container they observe,
    /// so a value and every wrapper around it share one identity.
    pub fn target_id(&self) -> Option<TargetId> {
        match self {
            Value::List(list) => Some(TargetId(Arc::as_ptr(list) as usize)),
            Value::Map(map) => Some(TargetId(Arc::as_ptr(map) as *const () as usize)),
            Value::Observed(obs) => obs.raw().target_id(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The wrapper handle, if this value is observed.
    pub fn as_observed(&self) -> Option<&Observed> {
        match self {
            Value::Observed(obs) => Some(obs),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            (Value::Observed(a), Value::Observed(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Same-value comparison used to gate writes.
///
/// Primitives compare structurally except floats, which compare by bit
/// pattern: `NaN` equals itself, `+0.0` and `-0.0` differ. Containers
/// and wrappers compare by identity.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::List(list) => f
                .debug_tuple("List")
                .field(&TargetId(Arc::as_ptr(list) as usize))
                .finish(),
            Value::Map(map) => f
                .debug_tuple("Map")
                .field(&TargetId(Arc::as_ptr(map) as *const () as usize))
                .finish(),
            Value::Observed(obs) => fmt::Debug::fmt(obs, f),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

//! Dependency keys and trigger operations.

use std::fmt;

/// The key half of a dependency edge.
///
/// Concrete keys name a record field or a list index. Two synthetic keys
/// stand in for operations no concrete key describes: [`DepKey::Iterate`]
/// for key enumeration and collection size, [`DepKey::Length`] for list
/// length. [`DepKey::Value`] is the whole-cell key used by signals and
/// computed cells, which have no inner structure to address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DepKey {
    /// A named record field.
    Entry(String),
    /// A list index.
    Index(usize),
    /// Synthetic: key enumeration / collection size.
    Iterate,
    /// Synthetic: list length.
    Length,
    /// The single value of a signal or computed cell.
    Value,
}

impl From<&str> for DepKey {
    fn from(name: &str) -> Self {
        DepKey::Entry(name.to_owned())
    }
}

impl From<String> for DepKey {
    fn from(name: String) -> Self {
        DepKey::Entry(name)
    }
}

impl From<usize> for DepKey {
    fn from(index: usize) -> Self {
        DepKey::Index(index)
    }
}

impl fmt::Display for DepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepKey::Entry(name) => write!(f, "{name}"),
            DepKey::Index(index) => write!(f, "[{index}]"),
            DepKey::Iterate => write!(f, "<iterate>"),
            DepKey::Length => write!(f, "<length>"),
            DepKey::Value => write!(f, "<value>"),
        }
    }
}

/// Why a trigger fired.
///
/// The operation kind decides which synthetic edges join the fan-out:
/// `Add` and `Delete` pull in the iteration and length edges, `Clear`
/// notifies every edge of the target, `Set` stays on the exact key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOp {
    /// An existing location changed value.
    Set,
    /// A new key or index appeared.
    Add,
    /// A key or index was removed.
    Delete,
    /// The whole container was emptied.
    Clear,
}

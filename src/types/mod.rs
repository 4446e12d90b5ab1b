#![forbid(unsafe_code)]

//! Identifiers, kinds and the crate-wide error type.

use std::borrow::Cow;
use std::fmt;

use smallvec::SmallVec;
use thiserror::Error;

/// Opaque identifier of a node owned by the graph store.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct NodeId(pub u64);

/// Opaque identifier of a relationship owned by the graph store.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct EdgeId(pub u64);

impl NodeId {
    /// Returns the raw integer form used by reachability sets.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl EdgeId {
    /// Returns the raw integer form of the identifier.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

impl From<NodeId> for u64 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

/// Converts raw reachability-set members back into node identifiers.
pub fn node_ids(raw: impl IntoIterator<Item = u64>) -> Vec<NodeId> {
    raw.into_iter().map(NodeId).collect()
}

/// Tag attached to nodes (`User`, `Group`, ...) and relationships (`MemberOf`, ...).
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Kind(Cow<'static, str>);

impl Kind {
    /// Creates a kind from a static name, usable in constants.
    pub const fn from_static(name: &'static str) -> Self {
        Kind(Cow::Borrowed(name))
    }

    /// Creates a kind from an owned name.
    pub fn new(name: impl Into<String>) -> Self {
        Kind(Cow::Owned(name.into()))
    }

    /// Name of the kind.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kind({})", self.0)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Small set of kinds attached to a node.
#[derive(Clone, Default, Debug, Eq, PartialEq)]
pub struct Kinds(SmallVec<[Kind; 4]>);

impl Kinds {
    /// Creates an empty kind set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a kind unless already present.
    pub fn add(&mut self, kind: Kind) {
        if !self.contains(&kind) {
            self.0.push(kind);
        }
    }

    /// Returns true if `kind` is present.
    pub fn contains(&self, kind: &Kind) -> bool {
        self.0.iter().any(|k| k == kind)
    }

    /// Returns true if any of `kinds` is present.
    pub fn contains_one_of(&self, kinds: &[Kind]) -> bool {
        kinds.iter().any(|k| self.contains(k))
    }

    /// Iterates the kinds in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Kind> {
        self.0.iter()
    }

    /// Number of kinds in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when no kinds are attached.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[Kind; N]> for Kinds {
    fn from(value: [Kind; N]) -> Self {
        let mut kinds = Kinds::new();
        for kind in value {
            kinds.add(kind);
        }
        kinds
    }
}

impl From<&[Kind]> for Kinds {
    fn from(value: &[Kind]) -> Self {
        let mut kinds = Kinds::new();
        for kind in value {
            kinds.add(kind.clone());
        }
        kinds
    }
}

impl FromIterator<Kind> for Kinds {
    fn from_iter<T: IntoIterator<Item = Kind>>(iter: T) -> Self {
        let mut kinds = Kinds::new();
        for kind in iter {
            kinds.add(kind);
        }
        kinds
    }
}

/// Errors surfaced by the analysis engine and the graph store port.
#[derive(Debug, Error)]
pub enum PenumbraError {
    /// An optional entity or attribute is absent.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// A node lacks a property a deriver required.
    #[error("node {id} is missing property {name}")]
    MissingProperty {
        /// Node carrying the property.
        id: NodeId,
        /// Property name.
        name: &'static str,
    },
    /// A node property holds a value of the wrong type.
    #[error("node {id} property {name} is not a {expected}")]
    InvalidProperty {
        /// Node carrying the property.
        id: NodeId,
        /// Property name.
        name: &'static str,
        /// Expected value type.
        expected: &'static str,
    },
    /// A query or transaction failed inside the graph store.
    #[error("query failed: {0}")]
    Query(String),
    /// An internal invariant was violated.
    #[error("invariant violated: {0}")]
    Invariant(&'static str),
    /// The caller-supplied context was cancelled.
    #[error("operation cancelled")]
    Cancelled,
    /// Invalid argument or configuration value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A configuration document could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),
    /// A derivation pass failed.
    #[error("{pass} failed: {source}")]
    Pass {
        /// Name of the failed pass.
        pass: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<PenumbraError>,
    },
    /// Several independent failures combined into one.
    #[error("{} errors occurred: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<PenumbraError>),
}

fn join_errors(errors: &[PenumbraError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl PenumbraError {
    /// Returns true for absence-class errors that derivers log and skip.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PenumbraError::NotFound(_)
                | PenumbraError::MissingProperty { .. }
                | PenumbraError::InvalidProperty { .. }
        )
    }

    /// Wraps this error with the name of the pass that produced it.
    pub fn in_pass(self, pass: &'static str) -> Self {
        PenumbraError::Pass {
            pass,
            source: Box::new(self),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, PenumbraError>;

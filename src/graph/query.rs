//! Query criteria composed by the analysis engine and evaluated by graph stores.
//!
//! Node queries evaluate criteria against [`Target::Node`]; relationship queries
//! against [`Target::Start`], [`Target::Relationship`] and [`Target::End`].

use serde_json::Value;

use super::model::{Node, Relationship};
use crate::types::{EdgeId, Kind, NodeId};

/// Entity a criterion applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Target {
    /// The node of a node query.
    Node,
    /// The start node of a relationship query.
    Start,
    /// The relationship of a relationship query.
    Relationship,
    /// The end node of a relationship query.
    End,
}

/// Identifier comparison.
#[derive(Clone, Debug, PartialEq)]
pub enum IdOp {
    /// Identifier equals the value.
    Equals(u64),
    /// Identifier is one of the values.
    In(Vec<u64>),
}

/// Property comparison.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyOp {
    /// Property equals the value.
    Equals(Value),
    /// String property starts with the prefix.
    StartsWith(String),
    /// String property ends with the suffix.
    EndsWith(String),
    /// String property starts with the prefix, ignoring ASCII case.
    CaseInsensitiveStartsWith(String),
    /// Property is present and not null.
    Exists,
    /// Numeric property is strictly greater than the value.
    GreaterThan(f64),
    /// List property contains the value.
    ContainsElement(Value),
}

/// Composable query predicate.
#[derive(Clone, Debug, PartialEq)]
pub enum Criteria {
    /// Entity carries at least one of the kinds.
    Kind {
        /// Entity the filter applies to.
        target: Target,
        /// Accepted kinds.
        kinds: Vec<Kind>,
    },
    /// Identifier comparison.
    Id {
        /// Entity the filter applies to.
        target: Target,
        /// Comparison.
        op: IdOp,
    },
    /// Property comparison.
    Property {
        /// Entity the filter applies to.
        target: Target,
        /// Property name.
        name: String,
        /// Comparison.
        op: PropertyOp,
    },
    /// Every nested criterion holds. Empty matches everything.
    And(Vec<Criteria>),
    /// At least one nested criterion holds.
    Or(Vec<Criteria>),
    /// Nested criterion does not hold.
    Not(Box<Criteria>),
}

/// Entities visible to a criterion during evaluation.
#[derive(Clone, Copy, Default)]
pub struct Scope<'a> {
    node: Option<&'a Node>,
    start: Option<&'a Node>,
    relationship: Option<&'a Relationship>,
    end: Option<&'a Node>,
}

impl<'a> Scope<'a> {
    /// Scope of a node query.
    pub fn node(node: &'a Node) -> Self {
        Self {
            node: Some(node),
            ..Self::default()
        }
    }

    /// Scope of a relationship query.
    pub fn relationship(start: &'a Node, relationship: &'a Relationship, end: &'a Node) -> Self {
        Self {
            node: None,
            start: Some(start),
            relationship: Some(relationship),
            end: Some(end),
        }
    }

    fn node_for(&self, target: Target) -> Option<&'a Node> {
        match target {
            Target::Node => self.node,
            Target::Start => self.start,
            Target::End => self.end,
            Target::Relationship => None,
        }
    }
}

impl Criteria {
    /// Criteria matching every entity.
    pub fn all() -> Self {
        Criteria::And(Vec::new())
    }

    /// Combines `self` and `other` with AND, flattening nested conjunctions.
    pub fn and(self, other: Criteria) -> Criteria {
        let mut parts = match self {
            Criteria::And(parts) => parts,
            single => vec![single],
        };
        match other {
            Criteria::And(more) => parts.extend(more),
            single => parts.push(single),
        }
        Criteria::And(parts)
    }

    /// Evaluates the criteria against `scope`. Targets missing from the scope never match.
    pub fn matches(&self, scope: &Scope<'_>) -> bool {
        match self {
            Criteria::And(parts) => parts.iter().all(|part| part.matches(scope)),
            Criteria::Or(parts) => parts.iter().any(|part| part.matches(scope)),
            Criteria::Not(inner) => !inner.matches(scope),
            Criteria::Kind { target, kinds } => match target {
                Target::Relationship => scope
                    .relationship
                    .is_some_and(|rel| kinds.contains(&rel.kind)),
                other => scope
                    .node_for(*other)
                    .is_some_and(|node| node.kinds.contains_one_of(kinds)),
            },
            Criteria::Id { target, op } => {
                let id = match target {
                    Target::Relationship => scope.relationship.map(|rel| rel.id.get()),
                    other => scope.node_for(*other).map(|node| node.id.get()),
                };
                id.is_some_and(|id| match op {
                    IdOp::Equals(value) => id == *value,
                    IdOp::In(values) => values.contains(&id),
                })
            }
            Criteria::Property { target, name, op } => {
                let properties = match target {
                    Target::Relationship => scope.relationship.map(|rel| &rel.properties),
                    other => scope.node_for(*other).map(|node| &node.properties),
                };
                properties.is_some_and(|props| match props.get(name) {
                    Some(value) => property_matches(value, op),
                    None => false,
                })
            }
        }
    }

    /// Identifier `target` is pinned to when every match must share it.
    pub fn pinned_id(&self, target: Target) -> Option<u64> {
        match self {
            Criteria::Id {
                target: t,
                op: IdOp::Equals(id),
            } if *t == target => Some(*id),
            Criteria::And(parts) => parts.iter().find_map(|part| part.pinned_id(target)),
            _ => None,
        }
    }
}

fn property_matches(value: &Value, op: &PropertyOp) -> bool {
    match op {
        PropertyOp::Exists => !value.is_null(),
        PropertyOp::Equals(expected) => match (value.as_f64(), expected.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => value == expected,
        },
        PropertyOp::StartsWith(prefix) => value.as_str().is_some_and(|s| s.starts_with(prefix.as_str())),
        PropertyOp::EndsWith(suffix) => value.as_str().is_some_and(|s| s.ends_with(suffix.as_str())),
        PropertyOp::CaseInsensitiveStartsWith(prefix) => value.as_str().is_some_and(|s| {
            s.len() >= prefix.len()
                && s.is_char_boundary(prefix.len())
                && s[..prefix.len()].eq_ignore_ascii_case(prefix)
        }),
        PropertyOp::GreaterThan(bound) => value.as_f64().is_some_and(|n| n > *bound),
        PropertyOp::ContainsElement(element) => value
            .as_array()
            .is_some_and(|items| items.iter().any(|item| item == element)),
    }
}

/// Node query target.
pub fn node() -> Target {
    Target::Node
}

/// Start node target of a relationship query.
pub fn start() -> Target {
    Target::Start
}

/// Relationship target of a relationship query.
pub fn relationship() -> Target {
    Target::Relationship
}

/// End node target of a relationship query.
pub fn end() -> Target {
    Target::End
}

/// `target` carries `kind`.
pub fn kind(target: Target, kind: Kind) -> Criteria {
    Criteria::Kind {
        target,
        kinds: vec![kind],
    }
}

/// `target` carries at least one of `kinds`.
pub fn kind_in(target: Target, kinds: &[Kind]) -> Criteria {
    Criteria::Kind {
        target,
        kinds: kinds.to_vec(),
    }
}

/// Node identifier of `target` equals `id`.
pub fn id_equals(target: Target, id: NodeId) -> Criteria {
    Criteria::Id {
        target,
        op: IdOp::Equals(id.get()),
    }
}

/// Relationship identifier equals `id`.
pub fn edge_id_equals(id: EdgeId) -> Criteria {
    Criteria::Id {
        target: Target::Relationship,
        op: IdOp::Equals(id.get()),
    }
}

/// Node identifier of `target` is one of `ids`.
pub fn id_in(target: Target, ids: impl IntoIterator<Item = u64>) -> Criteria {
    Criteria::Id {
        target,
        op: IdOp::In(ids.into_iter().collect()),
    }
}

fn property(target: Target, name: &str, op: PropertyOp) -> Criteria {
    Criteria::Property {
        target,
        name: name.to_owned(),
        op,
    }
}

/// Property `name` of `target` equals `value`.
pub fn equals(target: Target, name: &str, value: impl Into<Value>) -> Criteria {
    property(target, name, PropertyOp::Equals(value.into()))
}

/// String property `name` of `target` starts with `prefix`.
pub fn starts_with(target: Target, name: &str, prefix: impl Into<String>) -> Criteria {
    property(target, name, PropertyOp::StartsWith(prefix.into()))
}

/// String property `name` of `target` ends with `suffix`.
pub fn ends_with(target: Target, name: &str, suffix: impl Into<String>) -> Criteria {
    property(target, name, PropertyOp::EndsWith(suffix.into()))
}

/// String property `name` of `target` starts with `prefix`, ignoring case.
pub fn case_insensitive_starts_with(target: Target, name: &str, prefix: impl Into<String>) -> Criteria {
    property(target, name, PropertyOp::CaseInsensitiveStartsWith(prefix.into()))
}

/// Property `name` of `target` is set.
pub fn exists(target: Target, name: &str) -> Criteria {
    property(target, name, PropertyOp::Exists)
}

/// Numeric property `name` of `target` is greater than `bound`.
pub fn greater_than(target: Target, name: &str, bound: f64) -> Criteria {
    property(target, name, PropertyOp::GreaterThan(bound))
}

/// List property `name` of `target` contains `element`.
pub fn contains_element(target: Target, name: &str, element: impl Into<Value>) -> Criteria {
    property(target, name, PropertyOp::ContainsElement(element.into()))
}

/// Conjunction of `parts`.
pub fn and(parts: impl IntoIterator<Item = Criteria>) -> Criteria {
    Criteria::And(parts.into_iter().collect())
}

/// Disjunction of `parts`.
pub fn or(parts: impl IntoIterator<Item = Criteria>) -> Criteria {
    Criteria::Or(parts.into_iter().collect())
}

/// Negation of `inner`.
pub fn not(inner: Criteria) -> Criteria {
    Criteria::Not(Box::new(inner))
}

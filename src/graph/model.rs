//! Hydrated nodes, relationships and their property maps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{EdgeId, Kind, Kinds, NodeId, PenumbraError, Result};

/// Property map attached to nodes and relationships.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties(BTreeMap<String, Value>);

impl Properties {
    /// Creates an empty property map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Sets `name` to `value`, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Returns the raw value of `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Returns true when `name` is present and not null.
    pub fn exists(&self, name: &str) -> bool {
        self.0.get(name).is_some_and(|value| !value.is_null())
    }

    /// Removes `name`, returning its previous value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// Iterates properties in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when no property is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Node hydrated out of a transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    /// Store-assigned identifier.
    pub id: NodeId,
    /// Kind tags.
    pub kinds: Kinds,
    /// Property map.
    pub properties: Properties,
}

impl Node {
    /// Creates a node value.
    pub fn new(id: NodeId, kinds: Kinds, properties: Properties) -> Self {
        Self {
            id,
            kinds,
            properties,
        }
    }

    /// Returns true when the node carries `kind`.
    pub fn has_kind(&self, kind: &Kind) -> bool {
        self.kinds.contains(kind)
    }

    fn lookup(&self, name: &'static str) -> Result<&Value> {
        match self.properties.get(name) {
            None | Some(Value::Null) => Err(PenumbraError::MissingProperty { id: self.id, name }),
            Some(value) => Ok(value),
        }
    }

    fn invalid(&self, name: &'static str, expected: &'static str) -> PenumbraError {
        PenumbraError::InvalidProperty {
            id: self.id,
            name,
            expected,
        }
    }

    /// String property `name`.
    pub fn str_prop(&self, name: &'static str) -> Result<&str> {
        self.lookup(name)?
            .as_str()
            .ok_or_else(|| self.invalid(name, "string"))
    }

    /// Boolean property `name`.
    pub fn bool_prop(&self, name: &'static str) -> Result<bool> {
        self.lookup(name)?
            .as_bool()
            .ok_or_else(|| self.invalid(name, "bool"))
    }

    /// Boolean property `name`, falling back to `default` when absent or mistyped.
    pub fn bool_or(&self, name: &'static str, default: bool) -> bool {
        self.bool_prop(name).unwrap_or(default)
    }

    /// Integer property `name`. Whole floats are accepted.
    pub fn int_prop(&self, name: &'static str) -> Result<i64> {
        let value = self.lookup(name)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| self.invalid(name, "integer"))
    }

    /// String list property `name`.
    pub fn string_list(&self, name: &'static str) -> Result<Vec<String>> {
        match self.lookup(name)? {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_owned)
                        .ok_or_else(|| self.invalid(name, "string list"))
                })
                .collect(),
            _ => Err(self.invalid(name, "string list")),
        }
    }

    /// String list property `name`, or an empty list when absent.
    pub fn string_list_or_empty(&self, name: &'static str) -> Result<Vec<String>> {
        match self.string_list(name) {
            Err(PenumbraError::MissingProperty { .. }) => Ok(Vec::new()),
            other => other,
        }
    }
}

/// Relationship hydrated out of a transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct Relationship {
    /// Store-assigned identifier.
    pub id: EdgeId,
    /// Source node.
    pub start: NodeId,
    /// Target node.
    pub end: NodeId,
    /// Relationship kind.
    pub kind: Kind,
    /// Property map.
    pub properties: Properties,
}

impl Relationship {
    /// Identifier triple of this relationship.
    pub fn triple(&self) -> RelationshipTriple {
        RelationshipTriple {
            id: self.id,
            start: self.start,
            end: self.end,
        }
    }
}

/// `{id, start, end}` projection of a relationship.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct RelationshipTriple {
    /// Relationship identifier.
    pub id: EdgeId,
    /// Source node.
    pub start: NodeId,
    /// Target node.
    pub end: NodeId,
}

/// Direction in which relationships are followed from a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Follow relationships whose start is the current node.
    Outbound,
    /// Follow relationships whose end is the current node.
    Inbound,
}

impl Direction {
    /// The opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            Direction::Outbound => Direction::Inbound,
            Direction::Inbound => Direction::Outbound,
        }
    }

    /// Node reached when following `triple` in this direction.
    pub fn next_node(self, triple: &RelationshipTriple) -> NodeId {
        match self {
            Direction::Outbound => triple.end,
            Direction::Inbound => triple.start,
        }
    }
}

// Node graph primitives

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable identifier of a node inside a FlowState
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Position of a node on the editor canvas
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Value stored in a node property (cell address, sheet name, flags...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{}", v),
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// A node of the processing graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Model name, e.g. "OpenExcel" or "ReadCell"
    pub kind: String,
    /// User-visible caption
    pub name: String,
    pub position: Position,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Node {
    pub fn new(id: NodeId, kind: impl Into<String>, position: Position) -> Self {
        let kind = kind.into();
        Self {
            id,
            name: kind.clone(),
            kind,
            position,
            properties: BTreeMap::new(),
        }
    }
}

/// One end of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub node: NodeId,
    pub port: u32,
}

impl PortRef {
    pub fn new(node: NodeId, port: u32) -> Self {
        Self { node, port }
    }
}

/// Directed edge from an output port to an input port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub from: PortRef,
    pub to: PortRef,
}

impl Connection {
    pub fn new(from: PortRef, to: PortRef) -> Self {
        Self { from, to }
    }

    pub fn touches(&self, node: NodeId) -> bool {
        self.from.node == node || self.to.node == node
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.from.node, self.from.port, self.to.node, self.to.port
        )
    }
}

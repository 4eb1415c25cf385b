// FlowState - The node graph that history commands mutate
//
// This is the single source of truth for the editor document. The GUI layer
// renders it; commands are the only code that modifies it so every change can
// be undone.

pub mod node;

pub use node::{Connection, Node, NodeId, PortRef, Position, PropertyValue};

use std::collections::BTreeMap;

/// Errors raised by invalid graph mutations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Node {0} already exists")]
    DuplicateNode(NodeId),

    #[error("Connection {0} already exists")]
    DuplicateConnection(Connection),

    #[error("Connection {0} not found")]
    ConnectionNotFound(Connection),

    #[error("Cannot connect node {0} to itself")]
    SelfConnection(NodeId),
}

pub type GraphResult<T> = Result<T, GraphError>;

/// In-memory node graph of one TinaFlow document
#[derive(Debug, Clone, Default)]
pub struct FlowState {
    nodes: BTreeMap<NodeId, Node>,
    connections: Vec<Connection>,
    next_id: u64,
}

impl FlowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id and add a fresh node
    pub fn add_node(&mut self, kind: &str, position: Position) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node::new(id, kind, position));
        id
    }

    /// Insert a node with a known id (used when restoring a deleted node)
    pub fn insert_node(&mut self, node: Node) -> GraphResult<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.next_id = self.next_id.max(node.id.0 + 1);
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// Remove a node along with every connection attached to it
    ///
    /// Each removed connection is returned with the index it had in the
    /// connection list, in ascending order, so restore_node() can put the
    /// graph back exactly as it was.
    pub fn remove_node(&mut self, id: NodeId) -> GraphResult<(Node, Vec<(usize, Connection)>)> {
        let node = self.nodes.remove(&id).ok_or(GraphError::NodeNotFound(id))?;
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.connections.len());
        let all = std::mem::take(&mut self.connections);
        for (index, connection) in all.into_iter().enumerate() {
            if connection.touches(id) {
                removed.push((index, connection));
            } else {
                kept.push(connection);
            }
        }
        self.connections = kept;
        Ok((node, removed))
    }

    /// Undo a remove_node(): reinsert the node and its connections at their
    /// recorded indices
    ///
    /// Everything is validated before the graph is touched, so on error the
    /// state is unchanged.
    pub fn restore_node(
        &mut self,
        node: Node,
        connections: &[(usize, Connection)],
    ) -> GraphResult<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        for (_, connection) in connections {
            if connection.from.node == connection.to.node {
                return Err(GraphError::SelfConnection(connection.from.node));
            }
            for end in [connection.from.node, connection.to.node] {
                if end != node.id && !self.nodes.contains_key(&end) {
                    return Err(GraphError::NodeNotFound(end));
                }
            }
            if self.connections.contains(connection) {
                return Err(GraphError::DuplicateConnection(*connection));
            }
        }

        self.next_id = self.next_id.max(node.id.0 + 1);
        self.nodes.insert(node.id, node);
        let mut ordered = connections.to_vec();
        ordered.sort_by_key(|(index, _)| *index);
        for (index, connection) in ordered {
            let index = index.min(self.connections.len());
            self.connections.insert(index, connection);
        }
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> GraphResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connect(&mut self, connection: Connection) -> GraphResult<()> {
        self.connect_at(self.connections.len(), connection)
    }

    /// Insert a connection at a given index of the connection list
    ///
    /// Indices past the end append.
    pub fn connect_at(&mut self, index: usize, connection: Connection) -> GraphResult<()> {
        if connection.from.node == connection.to.node {
            return Err(GraphError::SelfConnection(connection.from.node));
        }
        for end in [connection.from.node, connection.to.node] {
            if !self.nodes.contains_key(&end) {
                return Err(GraphError::NodeNotFound(end));
            }
        }
        if self.connections.contains(&connection) {
            return Err(GraphError::DuplicateConnection(connection));
        }
        let index = index.min(self.connections.len());
        self.connections.insert(index, connection);
        Ok(())
    }

    /// Remove a connection, returning the index it had
    pub fn disconnect(&mut self, connection: Connection) -> GraphResult<usize> {
        let index = self
            .connections
            .iter()
            .position(|c| *c == connection)
            .ok_or(GraphError::ConnectionNotFound(connection))?;
        self.connections.remove(index);
        Ok(index)
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn connections_of(&self, id: NodeId) -> Vec<Connection> {
        self.connections
            .iter()
            .filter(|c| c.touches(id))
            .copied()
            .collect()
    }

    pub fn is_connected(&self, connection: &Connection) -> bool {
        self.connections.contains(connection)
    }
}

/// Documents compare by content; the id allocator is not part of it
impl PartialEq for FlowState {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes && self.connections == other.connections
    }
}

// Concrete command implementations for the node graph

use crate::command::trait_def::{CommandError, CommandMeta, CommandResult, UndoableCommand};
use crate::graph::{Connection, FlowState, Node, NodeId, Position, PropertyValue};
use serde_json::json;

/// Command to add a node to the graph
///
/// The first execution allocates a fresh id. Undo keeps a snapshot of the
/// node so redo restores it under the same id, keeping later commands that
/// reference it valid.
pub struct CreateNodeCommand {
    meta: CommandMeta,
    kind: String,
    position: Position,
    created: Option<NodeId>,
    snapshot: Option<Node>,
}

impl CreateNodeCommand {
    pub fn new(kind: impl Into<String>, position: Position) -> Self {
        Self {
            meta: CommandMeta::new(),
            kind: kind.into(),
            position,
            created: None,
            snapshot: None,
        }
    }

    /// Id of the node, once executed
    pub fn node_id(&self) -> Option<NodeId> {
        self.created
    }
}

impl UndoableCommand for CreateNodeCommand {
    fn execute(&mut self, state: &mut FlowState) -> CommandResult<()> {
        let id = match &self.snapshot {
            Some(node) => {
                state
                    .insert_node(node.clone())
                    .map_err(CommandError::execution)?;
                node.id
            }
            None => state.add_node(&self.kind, self.position),
        };
        // Only dropped once the node is back, so a failed redo can be retried
        self.snapshot = None;
        self.created = Some(id);
        Ok(())
    }

    fn undo(&mut self, state: &mut FlowState) -> CommandResult<()> {
        let id = self
            .created
            .ok_or_else(|| CommandError::UndoFailed("Node was never created".into()))?;
        let (node, _) = state.remove_node(id).map_err(CommandError::undo)?;
        self.snapshot = Some(node);
        Ok(())
    }

    fn description(&self) -> String {
        "创建节点".into()
    }

    fn command_type(&self) -> &'static str {
        "CreateNode"
    }

    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn payload(&self) -> serde_json::Value {
        json!({
            "kind": self.kind,
            "position": self.position,
            "node": self.created,
        })
    }
}

/// Command to delete a node and every connection attached to it
pub struct DeleteNodeCommand {
    meta: CommandMeta,
    node: NodeId,
    removed: Option<(Node, Vec<(usize, Connection)>)>,
}

impl DeleteNodeCommand {
    pub fn new(node: NodeId) -> Self {
        Self {
            meta: CommandMeta::new(),
            node,
            removed: None,
        }
    }
}

impl UndoableCommand for DeleteNodeCommand {
    fn execute(&mut self, state: &mut FlowState) -> CommandResult<()> {
        let removed = state.remove_node(self.node).map_err(CommandError::execution)?;
        self.removed = Some(removed);
        Ok(())
    }

    fn undo(&mut self, state: &mut FlowState) -> CommandResult<()> {
        let (node, connections) = self
            .removed
            .as_ref()
            .ok_or_else(|| CommandError::UndoFailed("No deleted node stored".into()))?;
        state
            .restore_node(node.clone(), connections)
            .map_err(CommandError::undo)?;
        self.removed = None;
        Ok(())
    }

    fn description(&self) -> String {
        "删除节点".into()
    }

    fn command_type(&self) -> &'static str {
        "DeleteNode"
    }

    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn payload(&self) -> serde_json::Value {
        json!({ "node": self.node })
    }
}

/// Command to move a node on the canvas
///
/// Consecutive moves of the same node merge into one history entry that
/// keeps the oldest start position and the newest end position.
pub struct MoveNodeCommand {
    meta: CommandMeta,
    node: NodeId,
    new_position: Position,
    old_position: Option<Position>,
}

impl MoveNodeCommand {
    pub fn new(node: NodeId, position: Position) -> Self {
        Self {
            meta: CommandMeta::new(),
            node,
            new_position: position,
            old_position: None,
        }
    }

    pub fn new_position(&self) -> Position {
        self.new_position
    }

    pub fn old_position(&self) -> Option<Position> {
        self.old_position
    }
}

impl UndoableCommand for MoveNodeCommand {
    fn execute(&mut self, state: &mut FlowState) -> CommandResult<()> {
        let node = state.node_mut(self.node).map_err(CommandError::execution)?;
        // Redo must not overwrite the original start position
        if self.old_position.is_none() {
            self.old_position = Some(node.position);
        }
        node.position = self.new_position;
        Ok(())
    }

    fn undo(&mut self, state: &mut FlowState) -> CommandResult<()> {
        let old_position = self
            .old_position
            .ok_or_else(|| CommandError::UndoFailed("No previous position stored".into()))?;
        state.node_mut(self.node).map_err(CommandError::undo)?.position = old_position;
        Ok(())
    }

    fn description(&self) -> String {
        "移动节点".into()
    }

    fn command_type(&self) -> &'static str {
        "MoveNode"
    }

    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn can_merge_with(&self, other: &dyn UndoableCommand) -> bool {
        other
            .downcast_ref::<MoveNodeCommand>()
            .is_some_and(|other| other.node == self.node)
    }

    fn merge_with(
        &mut self,
        other: Box<dyn UndoableCommand>,
    ) -> Result<(), Box<dyn UndoableCommand>> {
        if !self.can_merge_with(&*other) {
            return Err(other);
        }
        if let Some(other) = other.downcast_ref::<MoveNodeCommand>() {
            self.new_position = other.new_position;
        }
        Ok(())
    }

    fn payload(&self) -> serde_json::Value {
        json!({
            "node": self.node,
            "from": self.old_position,
            "to": self.new_position,
        })
    }
}

/// Command to change the caption of a node
pub struct RenameNodeCommand {
    meta: CommandMeta,
    node: NodeId,
    new_name: String,
    old_name: Option<String>,
}

impl RenameNodeCommand {
    pub fn new(node: NodeId, name: impl Into<String>) -> Self {
        Self {
            meta: CommandMeta::new(),
            node,
            new_name: name.into(),
            old_name: None,
        }
    }
}

impl UndoableCommand for RenameNodeCommand {
    fn execute(&mut self, state: &mut FlowState) -> CommandResult<()> {
        let node = state.node_mut(self.node).map_err(CommandError::execution)?;
        self.old_name = Some(std::mem::replace(&mut node.name, self.new_name.clone()));
        Ok(())
    }

    fn undo(&mut self, state: &mut FlowState) -> CommandResult<()> {
        let old_name = self
            .old_name
            .clone()
            .ok_or_else(|| CommandError::UndoFailed("No previous name stored".into()))?;
        state.node_mut(self.node).map_err(CommandError::undo)?.name = old_name;
        Ok(())
    }

    fn description(&self) -> String {
        "重命名节点".into()
    }

    fn command_type(&self) -> &'static str {
        "RenameNode"
    }

    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn payload(&self) -> serde_json::Value {
        json!({
            "node": self.node,
            "old_name": self.old_name,
            "new_name": self.new_name,
        })
    }
}

/// Command to set one property of a node (file path, sheet name, cell...)
///
/// Repeated edits of the same property merge, so typing into a field
/// produces a single history entry.
pub struct ModifyPropertyCommand {
    meta: CommandMeta,
    node: NodeId,
    key: String,
    new_value: PropertyValue,
    /// Outer None: not executed yet. Inner None: property did not exist.
    old_value: Option<Option<PropertyValue>>,
}

impl ModifyPropertyCommand {
    pub fn new(node: NodeId, key: impl Into<String>, value: PropertyValue) -> Self {
        Self {
            meta: CommandMeta::new(),
            node,
            key: key.into(),
            new_value: value,
            old_value: None,
        }
    }
}

impl UndoableCommand for ModifyPropertyCommand {
    fn execute(&mut self, state: &mut FlowState) -> CommandResult<()> {
        let node = state.node_mut(self.node).map_err(CommandError::execution)?;
        let previous = node
            .properties
            .insert(self.key.clone(), self.new_value.clone());
        if self.old_value.is_none() {
            self.old_value = Some(previous);
        }
        Ok(())
    }

    fn undo(&mut self, state: &mut FlowState) -> CommandResult<()> {
        let old_value = self
            .old_value
            .clone()
            .ok_or_else(|| CommandError::UndoFailed("No previous value stored".into()))?;
        let node = state.node_mut(self.node).map_err(CommandError::undo)?;
        match old_value {
            Some(value) => {
                node.properties.insert(self.key.clone(), value);
            }
            None => {
                node.properties.remove(&self.key);
            }
        }
        Ok(())
    }

    fn description(&self) -> String {
        format!("修改属性 {}", self.key)
    }

    fn command_type(&self) -> &'static str {
        "ModifyProperty"
    }

    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn can_merge_with(&self, other: &dyn UndoableCommand) -> bool {
        other
            .downcast_ref::<ModifyPropertyCommand>()
            .is_some_and(|other| other.node == self.node && other.key == self.key)
    }

    fn merge_with(
        &mut self,
        other: Box<dyn UndoableCommand>,
    ) -> Result<(), Box<dyn UndoableCommand>> {
        if !self.can_merge_with(&*other) {
            return Err(other);
        }
        if let Some(other) = other.downcast_ref::<ModifyPropertyCommand>() {
            self.new_value = other.new_value.clone();
        }
        Ok(())
    }

    fn payload(&self) -> serde_json::Value {
        json!({
            "node": self.node,
            "key": self.key,
            "old_value": self.old_value.clone().flatten(),
            "new_value": self.new_value,
        })
    }
}

/// Command to wire an output port to an input port
pub struct ConnectCommand {
    meta: CommandMeta,
    connection: Connection,
}

impl ConnectCommand {
    pub fn new(connection: Connection) -> Self {
        Self {
            meta: CommandMeta::new(),
            connection,
        }
    }
}

impl UndoableCommand for ConnectCommand {
    fn execute(&mut self, state: &mut FlowState) -> CommandResult<()> {
        state
            .connect(self.connection)
            .map_err(CommandError::execution)
    }

    fn undo(&mut self, state: &mut FlowState) -> CommandResult<()> {
        state
            .disconnect(self.connection)
            .map(|_| ())
            .map_err(CommandError::undo)
    }

    fn description(&self) -> String {
        "连接端口".into()
    }

    fn command_type(&self) -> &'static str {
        "Connect"
    }

    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn payload(&self) -> serde_json::Value {
        json!({ "connection": self.connection })
    }
}

/// Command to remove a connection
pub struct DisconnectCommand {
    meta: CommandMeta,
    connection: Connection,
    /// Position in the connection list before removal
    index: Option<usize>,
}

impl DisconnectCommand {
    pub fn new(connection: Connection) -> Self {
        Self {
            meta: CommandMeta::new(),
            connection,
            index: None,
        }
    }
}

impl UndoableCommand for DisconnectCommand {
    fn execute(&mut self, state: &mut FlowState) -> CommandResult<()> {
        let index = state
            .disconnect(self.connection)
            .map_err(CommandError::execution)?;
        self.index = Some(index);
        Ok(())
    }

    fn undo(&mut self, state: &mut FlowState) -> CommandResult<()> {
        let index = self
            .index
            .ok_or_else(|| CommandError::UndoFailed("Connection was never removed".into()))?;
        state
            .connect_at(index, self.connection)
            .map_err(CommandError::undo)
    }

    fn description(&self) -> String {
        "断开连接".into()
    }

    fn command_type(&self) -> &'static str {
        "Disconnect"
    }

    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn payload(&self) -> serde_json::Value {
        json!({ "connection": self.connection })
    }
}

// UndoableCommand trait definition

use crate::graph::{FlowState, GraphError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;
use uuid::Uuid;

/// Result type for command operations
pub type CommandResult<T> = Result<T, CommandError>;

/// Errors that can occur during command execution
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    /// Command execution failed
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Undo operation failed, the document may not match the history
    #[error("Undo failed: {0}")]
    UndoFailed(String),

    /// Invalid use of the history (nested macro, undo while building a macro...)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,
}

impl CommandError {
    pub fn execution(err: GraphError) -> Self {
        CommandError::ExecutionFailed(err.to_string())
    }

    pub fn undo(err: GraphError) -> Self {
        CommandError::UndoFailed(err.to_string())
    }
}

/// Identity and creation time shared by every command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandMeta {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl CommandMeta {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }
}

impl Default for CommandMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Downcasting support for trait objects, implemented for every command type
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Trait for commands that support undo/redo
///
/// Every change to a FlowState document goes through this trait so the
/// CommandManager can reverse it. A command captures whatever it needs to
/// restore the previous state while executing.
///
/// # Thread Safety
/// Commands must be Send as the manager may be shared behind a mutex.
///
/// # Example
/// ```no_run
/// use tinaflow::command::trait_def::{CommandError, CommandMeta, CommandResult, UndoableCommand};
/// use tinaflow::graph::{FlowState, NodeId};
///
/// struct HideNodeCommand {
///     meta: CommandMeta,
///     node: NodeId,
///     old_name: Option<String>,
/// }
///
/// impl UndoableCommand for HideNodeCommand {
///     fn execute(&mut self, state: &mut FlowState) -> CommandResult<()> {
///         let node = state.node_mut(self.node).map_err(CommandError::execution)?;
///         self.old_name = Some(std::mem::take(&mut node.name));
///         Ok(())
///     }
///
///     fn undo(&mut self, state: &mut FlowState) -> CommandResult<()> {
///         let old = self
///             .old_name
///             .take()
///             .ok_or_else(|| CommandError::UndoFailed("No previous name stored".into()))?;
///         state.node_mut(self.node).map_err(CommandError::undo)?.name = old;
///         Ok(())
///     }
///
///     fn description(&self) -> String {
///         "隐藏节点".into()
///     }
///
///     fn command_type(&self) -> &'static str {
///         "HideNode"
///     }
///
///     fn meta(&self) -> &CommandMeta {
///         &self.meta
///     }
/// }
/// ```
pub trait UndoableCommand: AsAny + Send {
    /// Execute the command
    ///
    /// Should store the previous state internally for undo capability.
    /// On error the document must be left untouched.
    fn execute(&mut self, state: &mut FlowState) -> CommandResult<()>;

    /// Undo the command
    ///
    /// Restores the state to what it was before execute() was called.
    fn undo(&mut self, state: &mut FlowState) -> CommandResult<()>;

    /// Re-apply the command after an undo
    fn redo(&mut self, state: &mut FlowState) -> CommandResult<()> {
        self.execute(state)
    }

    /// Get a human-readable description of the command
    ///
    /// Used for menu labels (e.g., "撤销 移动节点")
    fn description(&self) -> String;

    /// Stable type tag used for display and serialization
    fn command_type(&self) -> &'static str;

    fn meta(&self) -> &CommandMeta;

    /// Optional: Check if this command can absorb `other`, issued right after it
    ///
    /// Useful for combining bursts of similar commands (e.g., dragging a node).
    /// Default implementation returns false.
    fn can_merge_with(&self, _other: &dyn UndoableCommand) -> bool {
        false
    }

    /// Optional: Merge a later command into this one
    ///
    /// Only called if can_merge_with() returned true and `other` has already
    /// been executed. A command that cannot be absorbed is handed back so the
    /// caller can keep it as its own history entry.
    fn merge_with(
        &mut self,
        other: Box<dyn UndoableCommand>,
    ) -> Result<(), Box<dyn UndoableCommand>> {
        Err(other)
    }

    /// Subclass-specific fields for the key-value document
    fn payload(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

impl dyn UndoableCommand {
    /// Serialize the command into a generic key-value document
    pub fn to_json(&self) -> serde_json::Value {
        let meta = self.meta();
        let mut doc = serde_json::json!({
            "id": meta.id.to_string(),
            "type": self.command_type(),
            "description": self.description(),
            "timestamp": meta.created_at.to_rfc3339(),
        });
        if let (Some(obj), serde_json::Value::Object(fields)) = (doc.as_object_mut(), self.payload())
        {
            obj.extend(fields);
        }
        doc
    }

    /// Downcast to a concrete command type
    pub fn downcast_ref<T: UndoableCommand>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

// TinaFlow - Undo/redo history for the node-graph editor

pub mod command;
pub mod config;
pub mod graph;
pub mod logging;
pub mod messaging;

// Re-export commonly used types for convenience
pub use command::{
    CommandError, CommandManager, CommandResult, CompositeCommand, MacroCommand, MacroScope,
    SharedCommandManager, UndoableCommand,
};
pub use config::HistoryConfig;
pub use graph::{FlowState, NodeId, Position};
pub use messaging::{HistoryEvent, Notification, create_notification_channel, drain_notifications};

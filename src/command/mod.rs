// Command Pattern for Undo/Redo functionality
//
// Every edit of a TinaFlow document goes through an UndoableCommand so it can
// be reversed.
//
// Architecture:
// - UndoableCommand trait: execute(), undo(), redo(), description(), merge hooks
// - CompositeCommand / MacroCommand: ordered children undone as one step
// - CommandManager: undo/redo stacks, merging, macros, save point
// - MacroScope: guard that closes a macro on scope exit
// - Concrete commands: CreateNodeCommand, MoveNodeCommand, etc.
//
// Integration with the UI:
// - Commands run on the UI thread and mutate the FlowState document
// - The manager queues change notifications into a ringbuffer that the UI
//   drains on its next idle tick

pub mod commands;
pub mod composite;
pub mod manager;
pub mod scope;
pub mod trait_def;

pub use composite::{CompositeCommand, MacroCommand};
pub use manager::{CommandManager, SharedCommandManager};
pub use scope::MacroScope;
pub use trait_def::{CommandError, CommandMeta, CommandResult, UndoableCommand};

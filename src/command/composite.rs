// CompositeCommand / MacroCommand - Several commands undone as one step

use crate::command::trait_def::{CommandError, CommandMeta, CommandResult, UndoableCommand};
use crate::graph::FlowState;
use log::{error, warn};

/// Ordered group of child commands treated as a single undo/redo unit
///
/// Execution runs children in insertion order. If a child fails, the children
/// that already succeeded are undone in reverse order and the error is
/// returned, so callers observe all-or-nothing behaviour. The failing child
/// itself is never undone: a command that returns an error from execute()
/// must not have modified the document.
pub struct CompositeCommand {
    meta: CommandMeta,
    description: String,
    children: Vec<Box<dyn UndoableCommand>>,
}

impl CompositeCommand {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            meta: CommandMeta::new(),
            description: description.into(),
            children: Vec::new(),
        }
    }

    /// Append a child; the composite takes ownership
    pub fn add_command(&mut self, command: Box<dyn UndoableCommand>) {
        self.children.push(command);
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn count(&self) -> usize {
        self.children.len()
    }

    pub fn children(&self) -> impl Iterator<Item = &dyn UndoableCommand> {
        self.children.iter().map(|c| &**c)
    }

    fn run_forward(&mut self, state: &mut FlowState, redo: bool) -> CommandResult<()> {
        for index in 0..self.children.len() {
            let child = &mut self.children[index];
            let result = if redo {
                child.redo(state)
            } else {
                child.execute(state)
            };

            if let Err(err) = result {
                warn!(
                    "composite '{}': child {} ({}) failed: {}, rolling back {} command(s)",
                    self.description,
                    index,
                    self.children[index].description(),
                    err,
                    index
                );
                for done in self.children[..index].iter_mut().rev() {
                    if let Err(rollback_err) = done.undo(state) {
                        error!(
                            "composite '{}': rollback of '{}' failed: {}",
                            self.description,
                            done.description(),
                            rollback_err
                        );
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }
}

impl UndoableCommand for CompositeCommand {
    fn execute(&mut self, state: &mut FlowState) -> CommandResult<()> {
        self.run_forward(state, false)
    }

    /// Undo every child in reverse order
    ///
    /// Keeps going after a failure so as little partial state as possible is
    /// left behind; the first error is reported.
    fn undo(&mut self, state: &mut FlowState) -> CommandResult<()> {
        let mut first_error: Option<CommandError> = None;
        for child in self.children.iter_mut().rev() {
            if let Err(err) = child.undo(state) {
                error!(
                    "composite '{}': undo of '{}' failed: {}",
                    self.description,
                    child.description(),
                    err
                );
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn redo(&mut self, state: &mut FlowState) -> CommandResult<()> {
        self.run_forward(state, true)
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn command_type(&self) -> &'static str {
        "Composite"
    }

    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn payload(&self) -> serde_json::Value {
        let children: Vec<serde_json::Value> = self.children.iter().map(|c| c.to_json()).collect();
        serde_json::json!({ "children": children })
    }
}

/// A composite built by CommandManager::begin_macro()/end_macro()
///
/// Same behaviour as CompositeCommand; only the type tag differs.
pub struct MacroCommand {
    inner: CompositeCommand,
}

impl MacroCommand {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            inner: CompositeCommand::new(description),
        }
    }

    pub fn add_command(&mut self, command: Box<dyn UndoableCommand>) {
        self.inner.add_command(command);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn count(&self) -> usize {
        self.inner.count()
    }
}

impl UndoableCommand for MacroCommand {
    fn execute(&mut self, state: &mut FlowState) -> CommandResult<()> {
        self.inner.execute(state)
    }

    fn undo(&mut self, state: &mut FlowState) -> CommandResult<()> {
        self.inner.undo(state)
    }

    fn redo(&mut self, state: &mut FlowState) -> CommandResult<()> {
        self.inner.redo(state)
    }

    fn description(&self) -> String {
        self.inner.description()
    }

    fn command_type(&self) -> &'static str {
        "Macro"
    }

    fn meta(&self) -> &CommandMeta {
        self.inner.meta()
    }

    fn payload(&self) -> serde_json::Value {
        self.inner.payload()
    }
}

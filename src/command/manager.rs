// CommandManager - Manages undo/redo stacks

use crate::command::composite::MacroCommand;
use crate::command::scope::MacroScope;
use crate::command::trait_def::{CommandError, CommandResult, UndoableCommand};
use crate::config::HistoryConfig;
use crate::graph::FlowState;
use crate::messaging::channels::NotificationProducer;
use crate::messaging::notification::{HistoryEvent, Notification};
use log::{debug, error, warn};
use ringbuf::traits::Producer;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Manager shared between the UI thread and background callers
pub type SharedCommandManager = Arc<Mutex<CommandManager>>;

/// Observable values; a notification is emitted when one of them changes
#[derive(Debug, Clone, PartialEq)]
struct Observed {
    can_undo: bool,
    can_redo: bool,
    undo_text: String,
    redo_text: String,
    unsaved: bool,
}

/// Manages command execution and undo/redo functionality
///
/// The CommandManager maintains two stacks:
/// - Undo stack: Commands that have been executed and can be undone
/// - Redo stack: Commands that have been undone and can be redone
///
/// When a new command is executed:
/// 1. Execute the command
/// 2. Merge it into the top entry, or push it onto the undo stack
/// 3. Clear the redo stack (since we're on a new timeline)
/// 4. Trim history to the undo limit
///
/// Between begin_macro() and end_macro() executed commands are collected into
/// a MacroCommand which lands on the undo stack as a single entry.
///
/// # Save point
/// The save point is the undo depth matching the saved document. It becomes
/// unreachable (None) when the entry it refers to is trimmed, merged into, or
/// discarded with the redo stack; has_unsaved_changes() then stays true
/// until the next save point. An open macro holding executed children also
/// counts as unsaved.
///
/// # Notifications
/// Change events are pushed into a ringbuffer once the stack mutation is
/// complete. The UI drains it on its next idle tick.
pub struct CommandManager {
    /// Stack of commands that can be undone (most recent at the back)
    undo_stack: VecDeque<Box<dyn UndoableCommand>>,

    /// Stack of commands that can be redone (most recent at the back)
    redo_stack: VecDeque<Box<dyn UndoableCommand>>,

    /// Macro being built between begin_macro() and end_macro()
    current_macro: Option<MacroCommand>,

    /// Maximum number of commands in the undo stack, 0 = unlimited
    undo_limit: usize,

    merge_enabled: bool,
    merge_timeout: Duration,

    /// Time of the last execution; merging is allowed while it is younger than merge_timeout
    last_execute: Option<Instant>,

    save_point: Option<usize>,

    undo_prefix: String,
    redo_prefix: String,

    notifier: Option<NotificationProducer>,
}

impl CommandManager {
    /// Create a new CommandManager with default settings
    pub fn new() -> Self {
        Self::from_config(&HistoryConfig::default())
    }

    /// Create a new CommandManager with a custom history limit
    pub fn with_capacity(undo_limit: usize) -> Self {
        let mut manager = Self::new();
        manager.undo_limit = undo_limit;
        manager
    }

    pub fn from_config(config: &HistoryConfig) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            current_macro: None,
            undo_limit: config.undo_limit,
            merge_enabled: config.merge_enabled,
            merge_timeout: config.merge_timeout(),
            last_execute: None,
            save_point: Some(0),
            undo_prefix: config.undo_prefix.clone(),
            redo_prefix: config.redo_prefix.clone(),
            notifier: None,
        }
    }

    /// Route change notifications into `producer`
    pub fn set_notifier(&mut self, producer: NotificationProducer) {
        self.notifier = Some(producer);
    }

    pub fn with_notifier(mut self, producer: NotificationProducer) -> Self {
        self.set_notifier(producer);
        self
    }

    pub fn into_shared(self) -> SharedCommandManager {
        Arc::new(Mutex::new(self))
    }

    /// Execute a command and record it in the history
    ///
    /// Inside a macro the command is executed and appended to the macro.
    /// Otherwise it is merged into the top of the undo stack when merging is
    /// enabled, the previous execution happened less than merge_timeout ago
    /// and the top command accepts it; if not, it is pushed as a new entry.
    ///
    /// # Errors
    /// Returns the command's error if execution fails. The history is left
    /// unchanged in that case.
    pub fn execute(
        &mut self,
        mut command: Box<dyn UndoableCommand>,
        state: &mut FlowState,
    ) -> CommandResult<()> {
        let before = self.observe();

        if let Err(err) = command.execute(state) {
            warn!("Command '{}' failed: {}", command.description(), err);
            return Err(err);
        }
        let description = command.description();

        if self.current_macro.is_some() {
            self.discard_redo();
            if let Some(current) = self.current_macro.as_mut() {
                current.add_command(command);
                debug!("Added '{}' to macro ({} commands)", description, current.count());
            }
            self.publish(before, vec![HistoryEvent::CommandExecuted(description)]);
            return Ok(());
        }

        self.discard_redo();

        let command = match self.try_merge(command) {
            Ok(()) => {
                debug!("Merged '{}' into previous command", description);
                None
            }
            Err(command) => Some(command),
        };

        if let Some(command) = command {
            self.undo_stack.push_back(command);
            self.trim_history();
        }

        self.last_execute = Some(Instant::now());
        self.publish(
            before,
            vec![
                HistoryEvent::CommandExecuted(description),
                HistoryEvent::HistoryChanged,
            ],
        );
        Ok(())
    }

    /// Undo the last command
    ///
    /// Pops the last command from the undo stack, undoes it, and pushes it to the redo stack.
    /// If the undo fails the command stays on the undo stack.
    ///
    /// # Errors
    /// Returns an error if:
    /// - A macro is being built
    /// - There are no commands to undo
    /// - The undo operation fails
    pub fn undo(&mut self, state: &mut FlowState) -> CommandResult<String> {
        self.ensure_idle("undo")?;
        let before = self.observe();

        let mut command = self.undo_stack.pop_back().ok_or(CommandError::NothingToUndo)?;
        let description = command.description();

        if let Err(err) = command.undo(state) {
            error!("Undo of '{}' failed: {}", description, err);
            self.undo_stack.push_back(command);
            return Err(err);
        }

        self.redo_stack.push_back(command);
        self.last_execute = None;
        self.publish(
            before,
            vec![
                HistoryEvent::CommandUndone(description.clone()),
                HistoryEvent::HistoryChanged,
            ],
        );
        Ok(description)
    }

    /// Redo the last undone command
    ///
    /// Pops the last command from the redo stack, redoes it, and pushes it to the undo stack.
    /// If the redo fails the command stays on the redo stack.
    ///
    /// # Errors
    /// Returns an error if:
    /// - A macro is being built
    /// - There are no commands to redo
    /// - The execution fails
    pub fn redo(&mut self, state: &mut FlowState) -> CommandResult<String> {
        self.ensure_idle("redo")?;
        let before = self.observe();

        let mut command = self.redo_stack.pop_back().ok_or(CommandError::NothingToRedo)?;
        let description = command.description();

        if let Err(err) = command.redo(state) {
            error!("Redo of '{}' failed: {}", description, err);
            self.redo_stack.push_back(command);
            return Err(err);
        }

        self.undo_stack.push_back(command);
        self.last_execute = None;
        self.publish(
            before,
            vec![
                HistoryEvent::CommandRedone(description.clone()),
                HistoryEvent::HistoryChanged,
            ],
        );
        Ok(description)
    }

    /// Start collecting executed commands into one history entry
    ///
    /// # Errors
    /// Only one macro can be open at a time; nesting returns InvalidState and
    /// leaves the open macro untouched.
    pub fn begin_macro(&mut self, description: impl Into<String>) -> CommandResult<()> {
        let description = description.into();
        if let Some(current) = &self.current_macro {
            warn!(
                "begin_macro('{}') ignored: macro '{}' is already open",
                description,
                current.description()
            );
            return Err(CommandError::InvalidState(format!(
                "Macro '{}' is already open",
                current.description()
            )));
        }
        debug!("Begin macro '{}'", description);
        self.current_macro = Some(MacroCommand::new(description));
        self.last_execute = None;
        Ok(())
    }

    /// Close the open macro and push it as a single undo entry
    ///
    /// Returns Ok(false) when the macro was empty and got discarded.
    ///
    /// # Errors
    /// Returns InvalidState if no macro is open.
    pub fn end_macro(&mut self) -> CommandResult<bool> {
        let before = self.observe();
        let Some(finished) = self.current_macro.take() else {
            warn!("end_macro() called without an open macro");
            return Err(CommandError::InvalidState("No macro is open".into()));
        };

        if finished.is_empty() {
            debug!("Discarding empty macro '{}'", finished.description());
            return Ok(false);
        }

        let description = finished.description();
        debug!("End macro '{}' ({} commands)", description, finished.count());

        self.undo_stack.push_back(Box::new(finished));
        self.trim_history();
        self.last_execute = None;
        self.publish(
            before,
            vec![
                HistoryEvent::CommandExecuted(description),
                HistoryEvent::HistoryChanged,
            ],
        );
        Ok(true)
    }

    /// Open a macro that is closed when the returned guard is dropped
    pub fn macro_scope(&mut self, description: impl Into<String>) -> MacroScope<'_> {
        MacroScope::new(self, description)
    }

    pub fn is_building_macro(&self) -> bool {
        self.current_macro.is_some()
    }

    /// Clear all command history
    ///
    /// Any open macro is discarded and the empty history becomes the save point.
    pub fn clear(&mut self) {
        let before = self.observe();
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.current_macro = None;
        self.save_point = Some(0);
        self.last_execute = None;
        self.publish(before, vec![HistoryEvent::HistoryChanged]);
    }

    /// Set the maximum undo depth (0 = unlimited), trimming immediately
    pub fn set_undo_limit(&mut self, limit: usize) {
        let before = self.observe();
        self.undo_limit = limit;
        if self.trim_history() > 0 {
            self.publish(before, vec![HistoryEvent::HistoryChanged]);
        }
    }

    pub fn undo_limit(&self) -> usize {
        self.undo_limit
    }

    pub fn set_merge_enabled(&mut self, enabled: bool) {
        self.merge_enabled = enabled;
    }

    pub fn merge_enabled(&self) -> bool {
        self.merge_enabled
    }

    pub fn set_merge_timeout(&mut self, timeout: Duration) {
        self.merge_timeout = timeout;
    }

    pub fn merge_timeout(&self) -> Duration {
        self.merge_timeout
    }

    /// Record the current undo depth as the saved state
    pub fn create_save_point(&mut self) {
        let before = self.observe();
        self.save_point = Some(self.undo_stack.len());
        self.publish(before, Vec::new());
    }

    /// Called after the document was written to disk
    pub fn mark_as_saved(&mut self) {
        self.create_save_point();
    }

    /// True when the document differs from the last save point
    ///
    /// Children already executed inside an open macro count as changes even
    /// though the macro is not on the undo stack yet.
    pub fn has_unsaved_changes(&self) -> bool {
        let pending = self.current_macro.as_ref().is_some_and(|m| !m.is_empty());
        pending || self.save_point != Some(self.undo_stack.len())
    }

    /// Check if there are commands that can be undone
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Check if there are commands that can be redone
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Get a description of the command that would be undone
    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(|cmd| cmd.description())
    }

    /// Get a description of the command that would be redone
    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.back().map(|cmd| cmd.description())
    }

    /// Menu label for undo, e.g. "撤销 移动节点"; empty when there is nothing to undo
    pub fn undo_text(&self) -> String {
        self.undo_description()
            .map(|desc| format!("{} {}", self.undo_prefix, desc))
            .unwrap_or_default()
    }

    pub fn redo_text(&self) -> String {
        self.redo_description()
            .map(|desc| format!("{} {}", self.redo_prefix, desc))
            .unwrap_or_default()
    }

    /// Descriptions of undoable commands, most recent first (0 = all)
    pub fn undo_history(&self, max_count: usize) -> Vec<String> {
        Self::history_of(&self.undo_stack, max_count)
    }

    /// Descriptions of redoable commands, next redo first (0 = all)
    pub fn redo_history(&self, max_count: usize) -> Vec<String> {
        Self::history_of(&self.redo_stack, max_count)
    }

    /// Get the number of commands in the undo stack
    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    /// Get the number of commands in the redo stack
    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    fn history_of(stack: &VecDeque<Box<dyn UndoableCommand>>, max_count: usize) -> Vec<String> {
        let limit = if max_count == 0 { stack.len() } else { max_count };
        stack
            .iter()
            .rev()
            .take(limit)
            .map(|cmd| cmd.description())
            .collect()
    }

    fn ensure_idle(&self, operation: &str) -> CommandResult<()> {
        match &self.current_macro {
            Some(current) => {
                warn!(
                    "{} ignored while macro '{}' is open",
                    operation,
                    current.description()
                );
                Err(CommandError::InvalidState(format!(
                    "Cannot {} while macro '{}' is open",
                    operation,
                    current.description()
                )))
            }
            None => Ok(()),
        }
    }

    fn merge_window_open(&self) -> bool {
        self.merge_enabled
            && self
                .last_execute
                .is_some_and(|at| at.elapsed() < self.merge_timeout)
    }

    /// Fold an already executed command into the top entry
    ///
    /// Hands the command back when it cannot be merged.
    fn try_merge(
        &mut self,
        command: Box<dyn UndoableCommand>,
    ) -> Result<(), Box<dyn UndoableCommand>> {
        if !self.merge_window_open() {
            return Err(command);
        }
        let depth = self.undo_stack.len();
        let Some(top) = self.undo_stack.back_mut() else {
            return Err(command);
        };
        if !top.can_merge_with(&*command) {
            return Err(command);
        }
        top.merge_with(command)?;

        // The saved entry now describes a different state
        if self.save_point == Some(depth) {
            self.save_point = None;
        }
        Ok(())
    }

    /// Drop the redo stack; a save point inside it becomes unreachable
    fn discard_redo(&mut self) {
        if self.save_point.is_some_and(|sp| sp > self.undo_stack.len()) {
            self.save_point = None;
        }
        self.redo_stack.clear();
    }

    /// Remove the oldest entries beyond the undo limit, returns how many were dropped
    fn trim_history(&mut self) -> usize {
        if self.undo_limit == 0 || self.undo_stack.len() <= self.undo_limit {
            return 0;
        }
        let excess = self.undo_stack.len() - self.undo_limit;
        self.undo_stack.drain(..excess);
        self.save_point = self
            .save_point
            .and_then(|sp| sp.checked_sub(excess));
        debug!("Trimmed {} command(s) from history", excess);
        excess
    }

    fn observe(&self) -> Observed {
        Observed {
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
            undo_text: self.undo_text(),
            redo_text: self.redo_text(),
            unsaved: self.has_unsaved_changes(),
        }
    }

    /// Queue `events` followed by whatever observable value changed since `before`
    fn publish(&mut self, before: Observed, mut events: Vec<HistoryEvent>) {
        if self.notifier.is_none() {
            return;
        }
        let after = self.observe();
        if before.can_undo != after.can_undo {
            events.push(HistoryEvent::CanUndoChanged(after.can_undo));
        }
        if before.can_redo != after.can_redo {
            events.push(HistoryEvent::CanRedoChanged(after.can_redo));
        }
        if before.undo_text != after.undo_text {
            events.push(HistoryEvent::UndoTextChanged(after.undo_text));
        }
        if before.redo_text != after.redo_text {
            events.push(HistoryEvent::RedoTextChanged(after.redo_text));
        }
        if before.unsaved != after.unsaved {
            events.push(HistoryEvent::SaveStateChanged(after.unsaved));
        }

        if let Some(notifier) = self.notifier.as_mut() {
            for event in events {
                if notifier.try_push(Notification::new(event)).is_err() {
                    warn!("Notification buffer full, history event dropped");
                }
            }
        }
    }
}

impl Default for CommandManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::commands::{CreateNodeCommand, MoveNodeCommand, RenameNodeCommand};
    use crate::command::trait_def::CommandMeta;
    use crate::graph::{NodeId, Position};
    use crate::messaging::channels::{create_notification_channel, drain_notifications};

    // Mock command for testing
    struct MockCommand {
        meta: CommandMeta,
        value: i32,
        executed: bool,
        fail_undo: bool,
        fail_redo: bool,
    }

    impl MockCommand {
        fn new(value: i32) -> Self {
            Self {
                meta: CommandMeta::new(),
                value,
                executed: false,
                fail_undo: false,
                fail_redo: false,
            }
        }
    }

    impl UndoableCommand for MockCommand {
        fn execute(&mut self, _state: &mut FlowState) -> CommandResult<()> {
            if self.fail_redo && self.executed {
                return Err(CommandError::ExecutionFailed("Redo refused".into()));
            }
            self.executed = true;
            Ok(())
        }

        fn undo(&mut self, _state: &mut FlowState) -> CommandResult<()> {
            if !self.executed || self.fail_undo {
                return Err(CommandError::UndoFailed("Not executed".into()));
            }
            Ok(())
        }

        fn description(&self) -> String {
            format!("Set value to {}", self.value)
        }

        fn command_type(&self) -> &'static str {
            "Mock"
        }

        fn meta(&self) -> &CommandMeta {
            &self.meta
        }
    }

    struct FailingCommand {
        meta: CommandMeta,
    }

    impl UndoableCommand for FailingCommand {
        fn execute(&mut self, _state: &mut FlowState) -> CommandResult<()> {
            Err(CommandError::ExecutionFailed("Always fails".into()))
        }

        fn undo(&mut self, _state: &mut FlowState) -> CommandResult<()> {
            Ok(())
        }

        fn description(&self) -> String {
            "Failing".into()
        }

        fn command_type(&self) -> &'static str {
            "Failing"
        }

        fn meta(&self) -> &CommandMeta {
            &self.meta
        }
    }

    fn mock(value: i32) -> Box<dyn UndoableCommand> {
        Box::new(MockCommand::new(value))
    }

    fn failing() -> Box<dyn UndoableCommand> {
        Box::new(FailingCommand {
            meta: CommandMeta::new(),
        })
    }

    fn state_with_node() -> (FlowState, NodeId) {
        let mut state = FlowState::new();
        let id = state.add_node("OpenExcel", Position::new(0.0, 0.0));
        (state, id)
    }

    #[test]
    fn test_execute_command() {
        let mut manager = CommandManager::new();
        let mut state = FlowState::new();

        manager.execute(mock(42), &mut state).unwrap();

        assert_eq!(manager.undo_count(), 1);
        assert_eq!(manager.redo_count(), 0);
        assert!(manager.can_undo());
        assert!(!manager.can_redo());
    }

    #[test]
    fn test_undo() {
        let mut manager = CommandManager::new();
        let mut state = FlowState::new();

        manager.execute(mock(42), &mut state).unwrap();

        let description = manager.undo(&mut state).unwrap();
        assert_eq!(description, "Set value to 42");
        assert_eq!(manager.undo_count(), 0);
        assert_eq!(manager.redo_count(), 1);
    }

    #[test]
    fn test_redo() {
        let mut manager = CommandManager::new();
        let mut state = FlowState::new();

        manager.execute(mock(42), &mut state).unwrap();
        manager.undo(&mut state).unwrap();

        let description = manager.redo(&mut state).unwrap();
        assert_eq!(description, "Set value to 42");
        assert_eq!(manager.undo_count(), 1);
        assert_eq!(manager.redo_count(), 0);
    }

    #[test]
    fn test_redo_stack_cleared_on_new_command() {
        let mut manager = CommandManager::new();
        let mut state = FlowState::new();

        // Execute, undo, then execute a new command
        manager.execute(mock(1), &mut state).unwrap();
        manager.undo(&mut state).unwrap();
        manager.execute(mock(2), &mut state).unwrap();

        // Redo stack should be cleared
        assert!(!manager.can_redo());
        assert_eq!(manager.redo_count(), 0);
    }

    #[test]
    fn test_history_limit() {
        let mut manager = CommandManager::with_capacity(3);
        let mut state = FlowState::new();

        // Execute 5 commands (more than limit)
        for i in 0..5 {
            manager.execute(mock(i), &mut state).unwrap();
        }

        // Should only keep the last 3
        assert_eq!(manager.undo_count(), 3);
        assert_eq!(
            manager.undo_history(0),
            vec!["Set value to 4", "Set value to 3", "Set value to 2"]
        );
    }

    #[test]
    fn test_unlimited_history() {
        let mut manager = CommandManager::with_capacity(0);
        let mut state = FlowState::new();
        for i in 0..250 {
            manager.execute(mock(i), &mut state).unwrap();
        }
        assert_eq!(manager.undo_count(), 250);
    }

    #[test]
    fn test_set_undo_limit_trims_eagerly() {
        let mut manager = CommandManager::with_capacity(0);
        let mut state = FlowState::new();
        for i in 0..10 {
            manager.execute(mock(i), &mut state).unwrap();
        }
        manager.set_undo_limit(4);
        assert_eq!(manager.undo_count(), 4);
        assert_eq!(manager.undo_limit(), 4);
        assert_eq!(manager.undo_description().unwrap(), "Set value to 9");
    }

    #[test]
    fn test_undo_with_empty_stack() {
        let mut manager = CommandManager::new();
        let mut state = FlowState::new();

        assert_eq!(manager.undo(&mut state), Err(CommandError::NothingToUndo));
    }

    #[test]
    fn test_redo_with_empty_stack() {
        let mut manager = CommandManager::new();
        let mut state = FlowState::new();

        assert_eq!(manager.redo(&mut state), Err(CommandError::NothingToRedo));
    }

    #[test]
    fn test_failed_execute_leaves_history_untouched() {
        let mut manager = CommandManager::new();
        let mut state = FlowState::new();
        manager.execute(mock(1), &mut state).unwrap();
        manager.undo(&mut state).unwrap();

        assert!(manager.execute(failing(), &mut state).is_err());
        assert_eq!(manager.undo_count(), 0);
        assert_eq!(manager.redo_count(), 1);
    }

    #[test]
    fn test_failed_undo_keeps_command_on_undo_stack() {
        let mut manager = CommandManager::new();
        let mut state = FlowState::new();
        let mut cmd = MockCommand::new(7);
        cmd.fail_undo = true;
        manager.execute(Box::new(cmd), &mut state).unwrap();

        assert!(matches!(
            manager.undo(&mut state),
            Err(CommandError::UndoFailed(_))
        ));
        assert_eq!(manager.undo_count(), 1);
        assert_eq!(manager.redo_count(), 0);
        assert_eq!(manager.undo_description().unwrap(), "Set value to 7");
    }

    #[test]
    fn test_failed_redo_keeps_command_on_redo_stack() {
        let mut manager = CommandManager::new();
        let mut state = FlowState::new();
        let mut cmd = MockCommand::new(7);
        cmd.fail_redo = true;
        manager.execute(Box::new(cmd), &mut state).unwrap();
        manager.undo(&mut state).unwrap();

        assert!(manager.redo(&mut state).is_err());
        assert_eq!(manager.undo_count(), 0);
        assert_eq!(manager.redo_count(), 1);
    }

    #[test]
    fn test_undo_redo_text() {
        let mut manager = CommandManager::new();
        let (mut state, id) = state_with_node();
        assert_eq!(manager.undo_text(), "");

        manager
            .execute(Box::new(RenameNodeCommand::new(id, "B")), &mut state)
            .unwrap();
        assert_eq!(manager.undo_text(), "撤销 重命名节点");

        manager.undo(&mut state).unwrap();
        assert_eq!(manager.undo_text(), "");
        assert_eq!(manager.redo_text(), "重做 重命名节点");
    }

    #[test]
    fn test_moves_merge_within_timeout() {
        let mut manager = CommandManager::new();
        let (mut state, id) = state_with_node();

        manager
            .execute(Box::new(MoveNodeCommand::new(id, Position::new(10.0, 0.0))), &mut state)
            .unwrap();
        manager
            .execute(Box::new(MoveNodeCommand::new(id, Position::new(20.0, 0.0))), &mut state)
            .unwrap();

        assert_eq!(manager.undo_count(), 1);
        manager.undo(&mut state).unwrap();
        assert_eq!(state.node(id).unwrap().position, Position::new(0.0, 0.0));
        manager.redo(&mut state).unwrap();
        assert_eq!(state.node(id).unwrap().position, Position::new(20.0, 0.0));
    }

    #[test]
    fn test_no_merge_after_timeout() {
        let mut manager = CommandManager::new();
        manager.set_merge_timeout(Duration::ZERO);
        let (mut state, id) = state_with_node();

        manager
            .execute(Box::new(MoveNodeCommand::new(id, Position::new(10.0, 0.0))), &mut state)
            .unwrap();
        manager
            .execute(Box::new(MoveNodeCommand::new(id, Position::new(20.0, 0.0))), &mut state)
            .unwrap();

        assert_eq!(manager.undo_count(), 2);
    }

    #[test]
    fn test_no_merge_when_disabled() {
        let mut manager = CommandManager::new();
        manager.set_merge_enabled(false);
        assert!(!manager.merge_enabled());
        let (mut state, id) = state_with_node();

        for x in [1.0, 2.0, 3.0] {
            manager
                .execute(Box::new(MoveNodeCommand::new(id, Position::new(x, 0.0))), &mut state)
                .unwrap();
        }
        assert_eq!(manager.undo_count(), 3);
    }

    #[test]
    fn test_no_merge_across_undo() {
        let mut manager = CommandManager::new();
        let (mut state, id) = state_with_node();
        let other = state.add_node("ReadCell", Position::default());

        manager
            .execute(Box::new(MoveNodeCommand::new(id, Position::new(10.0, 0.0))), &mut state)
            .unwrap();
        manager
            .execute(Box::new(RenameNodeCommand::new(other, "x")), &mut state)
            .unwrap();
        manager.undo(&mut state).unwrap();
        manager
            .execute(Box::new(MoveNodeCommand::new(id, Position::new(30.0, 0.0))), &mut state)
            .unwrap();

        assert_eq!(manager.undo_count(), 2);
    }

    #[test]
    fn test_macro_groups_commands() {
        let mut manager = CommandManager::new();
        let mut state = FlowState::new();

        manager.begin_macro("添加节点").unwrap();
        assert!(manager.is_building_macro());
        manager
            .execute(Box::new(CreateNodeCommand::new("OpenExcel", Position::default())), &mut state)
            .unwrap();
        manager
            .execute(Box::new(RenameNodeCommand::new(NodeId(0), "源文件")), &mut state)
            .unwrap();
        assert_eq!(manager.undo_count(), 0);
        assert!(manager.end_macro().unwrap());

        assert_eq!(manager.undo_count(), 1);
        assert_eq!(manager.undo_text(), "撤销 添加节点");

        manager.undo(&mut state).unwrap();
        assert_eq!(state.node_count(), 0);

        manager.redo(&mut state).unwrap();
        assert_eq!(state.node(NodeId(0)).unwrap().name, "源文件");
    }

    #[test]
    fn test_open_macro_counts_as_unsaved() {
        let (tx, mut rx) = create_notification_channel(64);
        let mut manager = CommandManager::new().with_notifier(tx);
        let (mut state, node) = state_with_node();

        manager.begin_macro("批量重命名").unwrap();
        assert!(!manager.has_unsaved_changes());
        manager
            .execute(Box::new(RenameNodeCommand::new(node, "输入")), &mut state)
            .unwrap();
        assert!(manager.has_unsaved_changes());

        let events: Vec<_> = drain_notifications(&mut rx)
            .into_iter()
            .map(|n| n.event)
            .collect();
        assert_eq!(
            events,
            vec![
                HistoryEvent::CommandExecuted("重命名节点".into()),
                HistoryEvent::SaveStateChanged(true),
            ]
        );

        manager.end_macro().unwrap();
        assert!(manager.has_unsaved_changes());
        let events: Vec<_> = drain_notifications(&mut rx)
            .into_iter()
            .map(|n| n.event)
            .collect();
        assert!(!events
            .iter()
            .any(|e| matches!(e, HistoryEvent::SaveStateChanged(_))));

        manager.undo(&mut state).unwrap();
        assert!(!manager.has_unsaved_changes());
    }

    #[test]
    fn test_empty_macro_is_discarded() {
        let mut manager = CommandManager::new();
        manager.begin_macro("空").unwrap();
        assert!(!manager.end_macro().unwrap());
        assert_eq!(manager.undo_count(), 0);
        assert!(!manager.has_unsaved_changes());
    }

    #[test]
    fn test_nested_macro_rejected() {
        let mut manager = CommandManager::new();
        let mut state = FlowState::new();
        manager.begin_macro("外层").unwrap();
        assert!(matches!(
            manager.begin_macro("内层"),
            Err(CommandError::InvalidState(_))
        ));
        manager.execute(mock(1), &mut state).unwrap();
        manager.end_macro().unwrap();
        assert_eq!(manager.undo_description().unwrap(), "外层");
    }

    #[test]
    fn test_end_macro_without_begin() {
        let mut manager = CommandManager::new();
        assert!(matches!(
            manager.end_macro(),
            Err(CommandError::InvalidState(_))
        ));
    }

    #[test]
    fn test_failed_command_inside_macro_only_drops_that_command() {
        let mut manager = CommandManager::new();
        let mut state = FlowState::new();
        manager.begin_macro("批量").unwrap();
        manager.execute(mock(1), &mut state).unwrap();
        assert!(manager.execute(failing(), &mut state).is_err());
        manager.execute(mock(2), &mut state).unwrap();
        manager.end_macro().unwrap();

        assert_eq!(manager.undo_count(), 1);
        manager.undo(&mut state).unwrap();
    }

    #[test]
    fn test_undo_rejected_while_building_macro() {
        let mut manager = CommandManager::new();
        let mut state = FlowState::new();
        manager.execute(mock(1), &mut state).unwrap();
        manager.begin_macro("宏").unwrap();
        assert!(matches!(
            manager.undo(&mut state),
            Err(CommandError::InvalidState(_))
        ));
        assert!(matches!(
            manager.redo(&mut state),
            Err(CommandError::InvalidState(_))
        ));
        assert_eq!(manager.undo_count(), 1);
    }

    #[test]
    fn test_clear() {
        let mut manager = CommandManager::new();
        let mut state = FlowState::new();
        manager.execute(mock(1), &mut state).unwrap();
        manager.execute(mock(2), &mut state).unwrap();
        manager.undo(&mut state).unwrap();
        manager.begin_macro("宏").unwrap();

        manager.clear();

        assert_eq!(manager.undo_count(), 0);
        assert_eq!(manager.redo_count(), 0);
        assert!(!manager.is_building_macro());
        assert!(!manager.has_unsaved_changes());
    }

    #[test]
    fn test_save_point() {
        let mut manager = CommandManager::new();
        let mut state = FlowState::new();
        assert!(!manager.has_unsaved_changes());

        manager.execute(mock(1), &mut state).unwrap();
        assert!(manager.has_unsaved_changes());

        manager.mark_as_saved();
        assert!(!manager.has_unsaved_changes());

        manager.execute(mock(2), &mut state).unwrap();
        assert!(manager.has_unsaved_changes());

        manager.undo(&mut state).unwrap();
        assert!(!manager.has_unsaved_changes());

        manager.undo(&mut state).unwrap();
        assert!(manager.has_unsaved_changes());

        manager.redo(&mut state).unwrap();
        assert!(!manager.has_unsaved_changes());
    }

    #[test]
    fn test_save_point_lost_when_redo_branch_discarded() {
        let mut manager = CommandManager::new();
        let mut state = FlowState::new();
        manager.execute(mock(1), &mut state).unwrap();
        manager.execute(mock(2), &mut state).unwrap();
        manager.create_save_point();

        manager.undo(&mut state).unwrap();
        manager.execute(mock(3), &mut state).unwrap();
        // Same depth as the save point, different document
        assert_eq!(manager.undo_count(), 2);
        assert!(manager.has_unsaved_changes());
    }

    #[test]
    fn test_save_point_lost_when_trimmed() {
        let mut manager = CommandManager::with_capacity(2);
        let mut state = FlowState::new();
        manager.execute(mock(1), &mut state).unwrap();
        manager.create_save_point();
        manager.execute(mock(2), &mut state).unwrap();
        manager.execute(mock(3), &mut state).unwrap();
        manager.execute(mock(4), &mut state).unwrap();

        manager.undo(&mut state).unwrap();
        manager.undo(&mut state).unwrap();
        assert_eq!(manager.undo_count(), 0);
        assert!(manager.has_unsaved_changes());
    }

    #[test]
    fn test_save_point_shifts_when_older_entries_trimmed() {
        let mut manager = CommandManager::with_capacity(3);
        let mut state = FlowState::new();
        manager.execute(mock(1), &mut state).unwrap();
        manager.execute(mock(2), &mut state).unwrap();
        manager.create_save_point();
        manager.execute(mock(3), &mut state).unwrap();
        manager.execute(mock(4), &mut state).unwrap();

        manager.undo(&mut state).unwrap();
        manager.undo(&mut state).unwrap();
        assert!(!manager.has_unsaved_changes());
    }

    #[test]
    fn test_merge_into_saved_entry_marks_unsaved() {
        let mut manager = CommandManager::new();
        let (mut state, id) = state_with_node();
        manager
            .execute(Box::new(MoveNodeCommand::new(id, Position::new(1.0, 0.0))), &mut state)
            .unwrap();
        manager.mark_as_saved();
        manager
            .execute(Box::new(MoveNodeCommand::new(id, Position::new(2.0, 0.0))), &mut state)
            .unwrap();

        assert_eq!(manager.undo_count(), 1);
        assert!(manager.has_unsaved_changes());
    }

    #[test]
    fn test_history_lists() {
        let mut manager = CommandManager::new();
        let mut state = FlowState::new();
        for i in 0..5 {
            manager.execute(mock(i), &mut state).unwrap();
        }
        manager.undo(&mut state).unwrap();
        manager.undo(&mut state).unwrap();

        assert_eq!(
            manager.undo_history(2),
            vec!["Set value to 2", "Set value to 1"]
        );
        assert_eq!(
            manager.redo_history(0),
            vec!["Set value to 3", "Set value to 4"]
        );
    }

    #[test]
    fn test_notifications_are_queued() {
        let (tx, mut rx) = create_notification_channel(64);
        let mut manager = CommandManager::new().with_notifier(tx);
        let mut state = FlowState::new();

        manager.execute(mock(1), &mut state).unwrap();
        let events: Vec<_> = drain_notifications(&mut rx)
            .into_iter()
            .map(|n| n.event)
            .collect();
        assert_eq!(
            events,
            vec![
                HistoryEvent::CommandExecuted("Set value to 1".into()),
                HistoryEvent::HistoryChanged,
                HistoryEvent::CanUndoChanged(true),
                HistoryEvent::UndoTextChanged("撤销 Set value to 1".into()),
                HistoryEvent::SaveStateChanged(true),
            ]
        );

        manager.undo(&mut state).unwrap();
        let events: Vec<_> = drain_notifications(&mut rx)
            .into_iter()
            .map(|n| n.event)
            .collect();
        assert_eq!(
            events,
            vec![
                HistoryEvent::CommandUndone("Set value to 1".into()),
                HistoryEvent::HistoryChanged,
                HistoryEvent::CanUndoChanged(false),
                HistoryEvent::CanRedoChanged(true),
                HistoryEvent::UndoTextChanged(String::new()),
                HistoryEvent::RedoTextChanged("重做 Set value to 1".into()),
                HistoryEvent::SaveStateChanged(false),
            ]
        );
    }

    #[test]
    fn test_full_notification_buffer_does_not_fail_execute() {
        let (tx, mut rx) = create_notification_channel(1);
        let mut manager = CommandManager::new().with_notifier(tx);
        let mut state = FlowState::new();

        manager.execute(mock(1), &mut state).unwrap();
        assert_eq!(manager.undo_count(), 1);
        assert_eq!(drain_notifications(&mut rx).len(), 1);
    }

    #[test]
    fn test_from_config() {
        let config = HistoryConfig {
            undo_limit: 2,
            merge_enabled: false,
            merge_timeout_ms: 50,
            undo_prefix: "Undo".into(),
            redo_prefix: "Redo".into(),
            ..HistoryConfig::default()
        };
        let mut manager = CommandManager::from_config(&config);
        let mut state = FlowState::new();
        manager.execute(mock(1), &mut state).unwrap();

        assert_eq!(manager.undo_limit(), 2);
        assert!(!manager.merge_enabled());
        assert_eq!(manager.merge_timeout(), Duration::from_millis(50));
        assert_eq!(manager.undo_text(), "Undo Set value to 1");
    }

    #[test]
    fn test_shared_manager() {
        let shared = CommandManager::new().into_shared();
        let mut state = FlowState::new();
        let handle = {
            let shared = shared.clone();
            std::thread::spawn(move || {
                let mut local = FlowState::new();
                shared.lock().unwrap().execute(mock(1), &mut local).unwrap();
            })
        };
        handle.join().unwrap();
        shared.lock().unwrap().execute(mock(2), &mut state).unwrap();
        assert_eq!(shared.lock().unwrap().undo_count(), 2);
    }
}

// History notifications - Queued change signals for the UI

use std::time::{SystemTime, UNIX_EPOCH};

/// Change signal emitted by the CommandManager
///
/// Availability, text and save-state events are only emitted when the value
/// actually changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    CanUndoChanged(bool),
    CanRedoChanged(bool),
    /// New menu label for undo ("撤销 移动节点"), empty when nothing to undo
    UndoTextChanged(String),
    RedoTextChanged(String),
    /// Description of the command that was executed (or merged)
    CommandExecuted(String),
    CommandUndone(String),
    CommandRedone(String),
    /// Stacks changed in any way; history panels should refresh
    HistoryChanged,
    /// Carries the new value of has_unsaved_changes()
    SaveStateChanged(bool),
}

/// Event with the time it was emitted
#[derive(Debug, Clone)]
pub struct Notification {
    pub event: HistoryEvent,
    pub timestamp: u64, // Unix timestamp in milliseconds
}

impl Notification {
    /// Wrap an event with the current timestamp
    pub fn new(event: HistoryEvent) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Self { event, timestamp }
    }

    /// Checks whether the notification is younger than `max_age_ms`
    pub fn is_recent(&self, max_age_ms: u64) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        now.saturating_sub(self.timestamp) < max_age_ms
    }
}

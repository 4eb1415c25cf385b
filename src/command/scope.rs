// MacroScope - Closes a macro when it goes out of scope

use crate::command::manager::CommandManager;
use log::warn;
use std::ops::{Deref, DerefMut};

/// Guard returned by CommandManager::macro_scope()
///
/// Commands executed through the guard land in one macro, which is closed on
/// drop, including early returns via `?`. If the macro could not be opened
/// (another one is already open) the guard leaves it alone on drop.
pub struct MacroScope<'a> {
    manager: &'a mut CommandManager,
    opened: bool,
}

impl<'a> MacroScope<'a> {
    pub fn new(manager: &'a mut CommandManager, description: impl Into<String>) -> Self {
        let opened = manager.begin_macro(description).is_ok();
        Self { manager, opened }
    }

    /// Whether this guard owns the macro it will close
    pub fn is_open(&self) -> bool {
        self.opened
    }
}

impl Deref for MacroScope<'_> {
    type Target = CommandManager;

    fn deref(&self) -> &Self::Target {
        self.manager
    }
}

impl DerefMut for MacroScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.manager
    }
}

impl Drop for MacroScope<'_> {
    fn drop(&mut self) {
        if self.opened {
            if let Err(err) = self.manager.end_macro() {
                warn!("Macro scope could not close its macro: {}", err);
            }
        }
    }
}

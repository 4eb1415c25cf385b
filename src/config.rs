// History configuration (RON file)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of commands kept in the undo stack
pub const DEFAULT_UNDO_LIMIT: usize = 100;
/// Default window during which consecutive commands may merge
pub const DEFAULT_MERGE_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

const CONFIG_DIR_NAME: &str = "tinaflow";
const CONFIG_FILE_NAME: &str = "history.ron";

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RON parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("RON error: {0}")]
    Ron(#[from] ron::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings of the undo/redo history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum undo depth, 0 means unlimited
    pub undo_limit: usize,
    pub merge_enabled: bool,
    pub merge_timeout_ms: u64,
    /// Prefix of the undo menu label
    pub undo_prefix: String,
    pub redo_prefix: String,
    /// Capacity of the notification ringbuffer
    pub notification_capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            undo_limit: DEFAULT_UNDO_LIMIT,
            merge_enabled: true,
            merge_timeout_ms: DEFAULT_MERGE_TIMEOUT_MS,
            undo_prefix: "撤销".to_string(),
            redo_prefix: "重做".to_string(),
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
        }
    }
}

impl HistoryConfig {
    pub fn merge_timeout(&self) -> Duration {
        Duration::from_millis(self.merge_timeout_ms)
    }

    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        let config: HistoryConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron_str(&text)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_ron_string()?)?;
        Ok(())
    }

    /// Load from `path`, falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!(
                    "No history config at {}, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Platform config location, e.g. ~/.config/tinaflow/history.ron
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.notification_capacity == 0 {
            return Err(ConfigError::Invalid(
                "notification_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

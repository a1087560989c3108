use crate::models::Component;
use serde::{Deserialize, Serialize};

/// User configuration from `ModSync Config.yaml`
///
/// Contains the two install roots and engine preferences. Environment variables of the
/// form `MODSYNC_SETTINGS__<FIELD>` override file values (see
/// [`crate::config::ConfigManager::load_effective_config`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub settings: ModSyncSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModSyncSettings {
    /// Root substituted for `<<modDirectory>>`
    #[serde(default)]
    pub mod_directory: String,

    /// Root substituted for `<<kotorDirectory>>`
    #[serde(default)]
    pub kotor_directory: String,

    #[serde(default)]
    pub debug_mode: bool,

    /// Watch both roots and evict cached validation results on change
    #[serde(default = "default_watch_filesystem")]
    pub watch_filesystem: bool,

    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,

    #[serde(default = "default_log_directory")]
    pub log_directory: String,
}

impl Default for ModSyncSettings {
    fn default() -> Self {
        Self {
            mod_directory: String::new(),
            kotor_directory: String::new(),
            debug_mode: false,
            watch_filesystem: default_watch_filesystem(),
            watch_debounce_ms: default_watch_debounce_ms(),
            log_directory: default_log_directory(),
        }
    }
}

fn default_watch_filesystem() -> bool {
    true
}

fn default_watch_debounce_ms() -> u64 {
    500
}

fn default_log_directory() -> String {
    "logs".to_string()
}

impl ModSyncSettings {
    /// Mod directory, or `None` when unset
    pub fn mod_directory(&self) -> Option<&str> {
        non_empty(&self.mod_directory)
    }

    /// Game directory, or `None` when unset
    pub fn kotor_directory(&self) -> Option<&str> {
        non_empty(&self.kotor_directory)
    }

    pub fn is_fully_configured(&self) -> bool {
        self.mod_directory().is_some() && self.kotor_directory().is_some()
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Instruction file contents: the full component graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstructionFile {
    #[serde(default)]
    pub components: Vec<Component>,
}

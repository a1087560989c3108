use crate::models::{InstructionFile, UserConfig};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat};
use std::fs;

/// Prefix for environment overrides, e.g. `MODSYNC_SETTINGS__MOD_DIRECTORY`
pub const ENV_PREFIX: &str = "MODSYNC";

/// Configuration manager for loading and saving YAML files.
///
/// Manages the user config (`ModSync Config.yaml`: install roots and engine preferences)
/// and reads/writes instruction files on behalf of the caller. The engine itself never
/// persists anything.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    user_config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory containing configuration files (e.g., "ModSync Data")
    ///
    /// # Returns
    /// A new ConfigManager instance
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            user_config_path: config_dir.join("ModSync Config.yaml"),
            config_dir,
        })
    }

    /// Load the user configuration file.
    ///
    /// # Returns
    /// The loaded UserConfig, or default if file doesn't exist
    pub fn load_user_config(&self) -> Result<UserConfig> {
        if !self.user_config_path.exists() {
            tracing::warn!(
                "User config file not found at {}, using defaults",
                self.user_config_path
            );
            return Ok(UserConfig::default());
        }

        let file_contents = fs::read_to_string(&self.user_config_path)
            .with_context(|| format!("Failed to read user config: {}", self.user_config_path))?;

        let config: UserConfig = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse user config: {}", self.user_config_path))?;

        tracing::info!("Loaded user config from {}", self.user_config_path);
        Ok(config)
    }

    /// Save the user configuration file.
    ///
    /// # Arguments
    /// * `config` - The UserConfig to save
    pub fn save_user_config(&self, config: &UserConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize user config to YAML")?;

        fs::write(&self.user_config_path, yaml_string)
            .with_context(|| format!("Failed to write user config: {}", self.user_config_path))?;

        tracing::info!("Saved user config to {}", self.user_config_path);
        Ok(())
    }

    /// Load the user config with environment overrides applied.
    ///
    /// `MODSYNC_SETTINGS__MOD_DIRECTORY=/mods` overrides `settings.mod_directory` from the
    /// file. A missing file yields defaults plus overrides.
    pub fn load_effective_config(&self) -> Result<UserConfig> {
        self.load_layered(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
    }

    fn load_layered(&self, environment: Environment) -> Result<UserConfig> {
        let layered = Config::builder()
            .add_source(
                File::from(self.user_config_path.as_std_path())
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(environment)
            .build()
            .with_context(|| format!("Failed to layer user config: {}", self.user_config_path))?;

        let config: UserConfig = layered
            .try_deserialize()
            .context("Failed to deserialize layered user config")?;

        tracing::debug!(
            "Effective config: mod_directory={:?}, kotor_directory={:?}",
            config.settings.mod_directory(),
            config.settings.kotor_directory()
        );
        Ok(config)
    }

    /// Load an instruction file (the component graph).
    ///
    /// # Arguments
    /// * `path` - YAML file with a top-level `components` list
    pub fn load_instruction_file<P: AsRef<Utf8Path>>(&self, path: P) -> Result<InstructionFile> {
        let path = path.as_ref();
        let file_contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read instruction file: {}", path))?;

        let file: InstructionFile = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse instruction file: {}", path))?;

        tracing::info!(
            "Loaded {} component(s) from {}",
            file.components.len(),
            path
        );
        Ok(file)
    }

    /// Save an instruction file.
    ///
    /// # Arguments
    /// * `path` - Destination file
    /// * `file` - The component graph to write
    pub fn save_instruction_file<P: AsRef<Utf8Path>>(
        &self,
        path: P,
        file: &InstructionFile,
    ) -> Result<()> {
        let path = path.as_ref();
        let yaml_string = serde_yaml_ng::to_string(file)
            .context("Failed to serialize instruction file to YAML")?;

        fs::write(path, yaml_string)
            .with_context(|| format!("Failed to write instruction file: {}", path))?;

        tracing::info!("Saved {} component(s) to {}", file.components.len(), path);
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn user_config_path(&self) -> &Utf8Path {
        &self.user_config_path
    }
}

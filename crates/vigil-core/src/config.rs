//! Configuration management for vigil
//!
//! Workspace-level settings for browser launch, per-action timeouts, visual
//! regression, selector healing and local storage.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Result, VigilError};

/// Directory holding vigil state under a workspace root
pub const VIGIL_DIR: &str = ".vigil";

/// Environment variable that switches headed mode on when set to `false`
pub const ENV_HEADLESS: &str = "HEADLESS";
/// Environment variable that disables visual checks (`off`, `false`, `0`)
pub const ENV_VISUAL: &str = "VIGIL_VISUAL";
/// Environment variable that disables selector healing (`off`, `false`, `0`)
pub const ENV_HEALING: &str = "VIGIL_HEALING";

/// Workspace-level vigil configuration
///
/// Loaded from `.vigil/config.toml` in the workspace root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilConfig {
    #[serde(default)]
    pub browser: BrowserSettings,

    #[serde(default)]
    pub timeouts: TimeoutSettings,

    #[serde(default)]
    pub visual: VisualSettings,

    #[serde(default)]
    pub healing: HealingSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

/// Browser launch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default = "default_window_width")]
    pub window_width: u32,

    #[serde(default = "default_window_height")]
    pub window_height: u32,

    /// Chrome sandboxing; off by default for container hosts
    #[serde(default)]
    pub sandbox: bool,
}

/// Per-action ceilings, each independently tunable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_open_ms")]
    pub open_ms: u64,

    #[serde(default = "default_click_ms")]
    pub click_ms: u64,

    #[serde(default = "default_type_ms")]
    pub type_ms: u64,

    /// Pause used by `wait` steps whose value is not a positive integer
    #[serde(default = "default_wait_ms")]
    pub default_wait_ms: u64,
}

/// Visual regression settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-pixel colour difference threshold on a [0, 1] scale.
    ///
    /// Defaults to 0.1, the value every stored baseline is compared with.
    /// Overriding it is a local extension; results then differ from other
    /// installations comparing the same images.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Artifact directory, relative to the workspace root
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
}

/// Selector healing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Markup characters submitted with a healing request
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: usize,
}

/// Local store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Data directory, relative to the workspace root
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

// Default value providers
fn default_true() -> bool {
    true
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    720
}

fn default_open_ms() -> u64 {
    30_000
}

fn default_click_ms() -> u64 {
    10_000
}

fn default_type_ms() -> u64 {
    5_000
}

fn default_wait_ms() -> u64 {
    1_000
}

fn default_threshold() -> f64 {
    0.1
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(VIGIL_DIR).join("visual")
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_max_tokens() -> usize {
    1024
}

fn default_snapshot_limit() -> usize {
    15_000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(VIGIL_DIR).join("data")
}

fn env_flag_off(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "off" | "false" | "0" | "no")
}

impl VigilConfig {
    /// Load configuration from `.vigil/config.toml` or use defaults.
    ///
    /// Environment overrides are applied on top of either source.
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(VIGIL_DIR).join("config.toml");

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| VigilError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Write default configuration to `.vigil/config.toml`
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_dir = root.join(VIGIL_DIR);
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| VigilError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Apply `HEADLESS`, `VIGIL_VISUAL` and `VIGIL_HEALING` overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(ENV_HEADLESS) {
            self.browser.headless = !env_flag_off(&value);
        }
        if let Ok(value) = std::env::var(ENV_VISUAL) {
            self.visual.enabled = !env_flag_off(&value);
        }
        if let Ok(value) = std::env::var(ENV_HEALING) {
            self.healing.enabled = !env_flag_off(&value);
        }
    }

    /// Artifact directory resolved against a workspace root
    pub fn artifact_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.visual.artifact_dir)
    }

    /// Data directory resolved against a workspace root
    pub fn data_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.storage.data_dir)
    }
}

impl TimeoutSettings {
    pub fn open(&self) -> Duration {
        Duration::from_millis(self.open_ms)
    }

    pub fn click(&self) -> Duration {
        Duration::from_millis(self.click_ms)
    }

    pub fn type_text(&self) -> Duration {
        Duration::from_millis(self.type_ms)
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: default_window_width(),
            window_height: default_window_height(),
            sandbox: false,
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            open_ms: default_open_ms(),
            click_ms: default_click_ms(),
            type_ms: default_type_ms(),
            default_wait_ms: default_wait_ms(),
        }
    }
}

impl Default for VisualSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
            artifact_dir: default_artifact_dir(),
        }
    }
}

impl Default for HealingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_model(),
            max_tokens: default_max_tokens(),
            snapshot_limit: default_snapshot_limit(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = VigilConfig::default();
        assert!(config.browser.headless);
        assert_eq!(config.timeouts.open_ms, 30_000);
        assert_eq!(config.timeouts.click_ms, 10_000);
        assert_eq!(config.timeouts.type_ms, 5_000);
        assert_eq!(config.timeouts.default_wait_ms, 1_000);
        assert_eq!(config.healing.snapshot_limit, 15_000);
        assert!((config.visual.threshold - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = VigilConfig::from_toml(
            r#"
            [timeouts]
            click_ms = 2500

            [visual]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.timeouts.click_ms, 2500);
        assert_eq!(config.timeouts.open_ms, 30_000);
        assert!(!config.visual.enabled);
        assert_eq!(config.visual.artifact_dir, PathBuf::from(".vigil/visual"));
        assert!((config.visual.threshold - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_threshold_override() {
        let config = VigilConfig::from_toml("[visual]\nthreshold = 0.25\n").unwrap();
        assert!((config.visual.threshold - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = VigilConfig::from_toml("[timeouts\nopen_ms = ").unwrap_err();
        assert!(matches!(err, VigilError::Config(_)));
    }

    #[test]
    fn test_write_default_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let path = VigilConfig::write_default(temp_dir.path()).unwrap();
        assert!(path.exists());

        let content = std::fs::read_to_string(path).unwrap();
        let config = VigilConfig::from_toml(&content).unwrap();
        assert_eq!(config.healing.model, "sonnet");
    }

    #[test]
    fn test_env_flag_off() {
        assert!(env_flag_off("false"));
        assert!(env_flag_off(" OFF "));
        assert!(env_flag_off("0"));
        assert!(!env_flag_off("true"));
    }
}

//! Registry configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `PROMPT_REGISTRY__*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat, Map};
use serde::{Deserialize, Serialize};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "PROMPT_REGISTRY";

/// File name of the persistent max ID counter.
pub const MAX_ID_FILE_NAME: &str = "request-prompt-max-id";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Seconds before a user's prompts expire when no client has retrieved
    /// them since the table was created or last expired.
    pub initial_timeout_secs: u64,

    /// Seconds before a user's prompts expire after the most recent client
    /// retrieval.
    pub activity_timeout_secs: u64,

    /// Outstanding prompts allowed per user before new requests are
    /// auto-denied.
    pub max_prompts_per_user: usize,

    /// Location of the max ID file.
    pub max_id_path: PathBuf,
}

fn default_max_id_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("prompt-registry")
        .join(MAX_ID_FILE_NAME)
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            initial_timeout_secs: 10,
            activity_timeout_secs: 10 * 60,
            max_prompts_per_user: 1000,
            max_id_path: default_max_id_path(),
        }
    }
}

impl RegistryConfig {
    /// Load configuration, reading `path` if given and present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`RegistryConfig::load`], taking environment variables from
    /// `env` instead of the process environment when given.
    fn load_with_env(path: Option<&Path>, env: Option<Map<String, String>>) -> Result<Self> {
        let defaults = Config::try_from(&RegistryConfig::default())
            .context("building default configuration")?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }
        let built = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .context("building configuration")?;

        built
            .try_deserialize()
            .context("deserializing configuration")
    }

    pub fn initial_timeout(&self) -> Duration {
        Duration::from_secs(self.initial_timeout_secs)
    }

    pub fn activity_timeout(&self) -> Duration {
        Duration::from_secs(self.activity_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.initial_timeout(), Duration::from_secs(10));
        assert_eq!(config.activity_timeout(), Duration::from_secs(600));
        assert_eq!(config.max_prompts_per_user, 1000);
        assert!(config.max_id_path.ends_with(MAX_ID_FILE_NAME));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "initial_timeout_secs = 3\nmax_prompts_per_user = 5\nmax_id_path = \"/tmp/ids\"\n",
        )
        .unwrap();

        let config = RegistryConfig::load(Some(&path)).unwrap();
        assert_eq!(config.initial_timeout_secs, 3);
        assert_eq!(config.activity_timeout_secs, 600);
        assert_eq!(config.max_prompts_per_user, 5);
        assert_eq!(config.max_id_path, PathBuf::from("/tmp/ids"));
    }

    #[test]
    fn test_env_overrides_file_and_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "initial_timeout_secs = 3\nmax_prompts_per_user = 5\n").unwrap();
        let env = Map::from_iter([
            ("PROMPT_REGISTRY__MAX_PROMPTS_PER_USER".to_string(), "7".to_string()),
            ("PROMPT_REGISTRY__ACTIVITY_TIMEOUT_SECS".to_string(), "30".to_string()),
            ("OTHER_APP__MAX_PROMPTS_PER_USER".to_string(), "9".to_string()),
        ]);

        let config = RegistryConfig::load_with_env(Some(&path), Some(env)).unwrap();
        assert_eq!(config.max_prompts_per_user, 7);
        assert_eq!(config.activity_timeout(), Duration::from_secs(30));
        assert_eq!(config.initial_timeout_secs, 3);

        let config = RegistryConfig::load_with_env(None, Some(Map::new())).unwrap();
        assert_eq!(config.max_prompts_per_user, 1000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = RegistryConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.max_prompts_per_user, 1000);
    }
}

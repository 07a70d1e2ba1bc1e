//! Configuration loading and management.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use ps_core::ReconcileOptions;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,

    /// Default reconciliation options; command-line flags override per run.
    #[serde(default)]
    pub reconcile: ReconcileOptions,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("pumpsync.db"),
            reconcile: ReconcileOptions::default(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    ///
    /// Later sources win: defaults, the user config file, `config_path`,
    /// then `PUMPSYNC_*` environment variables (`__` separates nested keys,
    /// e.g. `PUMPSYNC_RECONCILE__CARB_WINDOW_MINUTES`).
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("PUMPSYNC_").split("__"));

        figment.extract()
    }
}

/// Returns the platform-specific config directory for pumpsync.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("pumpsync"))
}

/// Returns the platform-specific data directory for pumpsync.
///
/// On Linux: `~/.local/share/pumpsync`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("pumpsync"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use figment::Jail;

    #[test]
    fn test_dirs_data_path_ends_with_pumpsync() {
        let path = dirs_data_path().unwrap();
        assert_eq!(path.file_name().unwrap(), "pumpsync");
    }

    #[test]
    fn test_default_config_uses_data_dir_for_db() {
        let config = Config::default();
        let data_dir = dirs_data_path().unwrap();
        assert_eq!(config.database_path, data_dir.join("pumpsync.db"));
        assert_eq!(config.reconcile, ReconcileOptions::default());
    }

    #[test]
    fn file_and_env_layers_override_defaults() {
        Jail::expect_with(|jail| {
            let dir = jail.directory().display().to_string();
            jail.set_env("XDG_CONFIG_HOME", dir);
            jail.create_file(
                "pumpsync.toml",
                r#"
                database_path = "/tmp/pumpsync-test.db"

                [reconcile]
                carb_window_minutes = 15
                device = "t:slim"
                "#,
            )?;
            jail.set_env("PUMPSYNC_RECONCILE__TEMP_BASAL_WINDOW_MINUTES", "0");
            jail.set_env("PUMPSYNC_RECONCILE__GLUCOSE_SYNC", "false");

            let config = Config::load_from(Some(Path::new("pumpsync.toml")))?;
            assert_eq!(config.database_path, PathBuf::from("/tmp/pumpsync-test.db"));
            assert_eq!(config.reconcile.carb_window_minutes, 15);
            assert_eq!(config.reconcile.temp_basal_window_minutes, 0);
            assert_eq!(config.reconcile.device, "t:slim");
            assert!(!config.reconcile.glucose_sync);
            assert!(config.reconcile.manual_bg_sync);
            Ok(())
        });
    }
}

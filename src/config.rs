//! Client configuration
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (cauldron.toml)
//! - Environment variables (CAULDRON_*)
//!
//! ## Example config file (cauldron.toml):
//! ```toml
//! [store]
//! active = "default"
//! local_path = "/home/me/.cauldron/stores"
//! ignore_required_client_version = false
//!
//! [store.repositories]
//! default = "git@github.com:acme/cauldron.git#main"
//! sandbox = "/srv/cauldron-sandbox"
//!
//! [container]
//! out_dir = "/home/me/.cauldron/containers"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Store selection and connection settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Container generation settings
    #[serde(default)]
    pub container: ContainerConfig,
}

/// Store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Key of the store in use
    #[serde(default)]
    pub active: Option<String>,

    /// Store key -> repository URL or absolute path, with an optional `#branch`
    #[serde(default)]
    pub repositories: BTreeMap<String, String>,

    /// Where remote stores are checked out
    #[serde(default)]
    pub local_path: Option<PathBuf>,

    /// Skip the store's required client version check
    #[serde(default)]
    pub ignore_required_client_version: bool,
}

/// Container configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Root directory for generated containers (one sub-directory per platform)
    #[serde(default)]
    pub out_dir: Option<PathBuf>,
}

impl ClientConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["cauldron.toml", ".cauldron.toml", "config/cauldron.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(dirs) = project_dirs() {
            let xdg_config = dirs.config_dir().join("cauldron.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Environment variables (CAULDRON_STORE__ACTIVE, ...)
        builder = builder.add_source(
            Environment::with_prefix("CAULDRON")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Working copy directory for a remote store
    pub fn store_local_path(&self, key: &str) -> PathBuf {
        let base = self
            .store
            .local_path
            .clone()
            .or_else(|| project_dirs().map(|d| d.data_dir().join("stores")))
            .unwrap_or_else(|| PathBuf::from(".cauldron/stores"));
        base.join(key)
    }

    /// Output directory for the container of a platform
    pub fn container_out_dir(&self, platform: &str) -> PathBuf {
        let base = self
            .container
            .out_dir
            .clone()
            .or_else(|| project_dirs().map(|d| d.cache_dir().join("containers")))
            .unwrap_or_else(|| PathBuf::from(".cauldron/containers"));
        base.join(platform)
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "familiar", "cauldron")
}

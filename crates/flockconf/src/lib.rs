//! Minimal configuration loading for flock nodes.
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): things that cannot change at
//!   runtime - bind addresses, blob store path, node identity, telemetry.
//!
//! - **Bootstrap** (`BootstrapConfig`): initial values that seed runtime
//!   state, currently the configured function map for nodes running
//!   without a container runtime integration.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/flockd/config.toml` (system)
//! 2. `~/.config/flockd/config.toml` (user)
//! 3. `./flockd.toml` (local override, or the `--config` path)
//! 4. Environment variables (`FLOCKD_*`)
//!
//! # Example Config
//!
//! ```toml
//! [bind]
//! http_port = 8180
//!
//! [paths]
//! blob_dir = "~/.local/share/flockd/blobs"
//!
//! [telemetry]
//! log_level = "info"
//!
//! [node]
//! name = "kitchen-pi"
//!
//! [bootstrap.functions]
//! echo = "127.0.0.1:8081"
//! resize = "10.62.0.4"
//! ```

pub mod loader;

pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// HTTP bind settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindConfig {
    pub http_port: u16,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self { http_port: 8180 }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Filesystem paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the content-addressed blob store.
    pub blob_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let blob_dir = directories::BaseDirs::new()
            .map(|d| d.data_local_dir().join("flockd/blobs"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/flockd/blobs"));
        Self { blob_dir }
    }
}

/// Node identity settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Stable node name on the mesh. Empty means generate one at startup.
    pub name: String,
}

/// Infrastructure - cannot change at runtime.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub bind: BindConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub node: NodeConfig,
}

/// Bootstrap - seeds runtime state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Configured function containers: name -> `ip[:port]`.
    ///
    /// Used by nodes running without a container runtime integration;
    /// entries still flow through the resolver's TTL refresh like any
    /// runtime-listed container.
    #[serde(default)]
    pub functions: BTreeMap<String, String>,
}

/// Complete flock node configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlockConfig {
    #[serde(flatten)]
    pub infra: InfraConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl FlockConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, optionally preferring a CLI-provided file over
    /// the local `./flockd.toml` override.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report where values came from.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = FlockConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to a TOML string for `--show-config`.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# flockd configuration\n\n");

        output.push_str("[bind]\n");
        output.push_str(&format!("http_port = {}\n", self.infra.bind.http_port));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.infra.telemetry.log_level
        ));

        output.push_str("\n[paths]\n");
        output.push_str(&format!(
            "blob_dir = \"{}\"\n",
            self.infra.paths.blob_dir.display()
        ));

        output.push_str("\n[node]\n");
        output.push_str(&format!("name = \"{}\"\n", self.infra.node.name));

        output.push_str("\n[bootstrap.functions]\n");
        for (name, addr) in &self.bootstrap.functions {
            output.push_str(&format!("{} = \"{}\"\n", name, addr));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = FlockConfig::default();
        assert_eq!(config.infra.bind.http_port, 8180);
        assert_eq!(config.infra.telemetry.log_level, "info");
        assert!(config.bootstrap.functions.is_empty());
    }

    #[test]
    fn to_toml_dumps_all_sections() {
        let mut config = FlockConfig::default();
        config
            .bootstrap
            .functions
            .insert("echo".to_string(), "127.0.0.1:8081".to_string());
        let toml = config.to_toml();
        assert!(toml.contains("[bind]"));
        assert!(toml.contains("[paths]"));
        assert!(toml.contains("[bootstrap.functions]"));
        assert!(toml.contains("echo = \"127.0.0.1:8081\""));
    }
}

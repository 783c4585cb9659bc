//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, FlockConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli); only files that
/// exist are returned.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/flockd/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("flockd/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    // CLI override takes precedence over local
    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("flockd.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<FlockConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse config from a TOML string.
pub fn parse_toml(contents: &str, path: &Path) -> Result<FlockConfig, ConfigError> {
    let table: toml::Table = contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let mut config = FlockConfig::default();

    if let Some(bind) = table.get("bind").and_then(|v| v.as_table()) {
        if let Some(v) = bind.get("http_port").and_then(|v| v.as_integer()) {
            config.infra.bind.http_port = v as u16;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.infra.telemetry.log_level = v.to_string();
        }
    }

    if let Some(paths) = table.get("paths").and_then(|v| v.as_table()) {
        if let Some(v) = paths.get("blob_dir").and_then(|v| v.as_str()) {
            config.infra.paths.blob_dir = expand_path(v);
        }
    }

    if let Some(node) = table.get("node").and_then(|v| v.as_table()) {
        if let Some(v) = node.get("name").and_then(|v| v.as_str()) {
            config.infra.node.name = v.to_string();
        }
    }

    if let Some(bootstrap) = table.get("bootstrap").and_then(|v| v.as_table()) {
        if let Some(functions) = bootstrap.get("functions").and_then(|v| v.as_table()) {
            for (name, addr) in functions {
                if let Some(addr) = addr.as_str() {
                    config
                        .bootstrap
                        .functions
                        .insert(name.clone(), addr.to_string());
                }
            }
        }
    }

    Ok(config)
}

/// Merge two configs, with `overlay` taking precedence where it differs
/// from the compiled defaults.
pub fn merge_configs(base: FlockConfig, overlay: FlockConfig) -> FlockConfig {
    let defaults = FlockConfig::default();
    let mut merged = base;

    if overlay.infra.bind.http_port != defaults.infra.bind.http_port {
        merged.infra.bind.http_port = overlay.infra.bind.http_port;
    }
    if overlay.infra.telemetry.log_level != defaults.infra.telemetry.log_level {
        merged.infra.telemetry.log_level = overlay.infra.telemetry.log_level;
    }
    if overlay.infra.paths.blob_dir != defaults.infra.paths.blob_dir {
        merged.infra.paths.blob_dir = overlay.infra.paths.blob_dir;
    }
    if overlay.infra.node.name != defaults.infra.node.name {
        merged.infra.node.name = overlay.infra.node.name;
    }
    if !overlay.bootstrap.functions.is_empty() {
        merged.bootstrap.functions = overlay.bootstrap.functions;
    }

    merged
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut FlockConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("FLOCKD_HTTP_PORT") {
        if let Ok(port) = v.parse() {
            config.infra.bind.http_port = port;
            sources.env_overrides.push("FLOCKD_HTTP_PORT".to_string());
        }
    }
    if let Ok(v) = env::var("FLOCKD_BLOB_DIR") {
        config.infra.paths.blob_dir = expand_path(&v);
        sources.env_overrides.push("FLOCKD_BLOB_DIR".to_string());
    }
    if let Ok(v) = env::var("FLOCKD_NODE_NAME") {
        config.infra.node.name = v;
        sources.env_overrides.push("FLOCKD_NODE_NAME".to_string());
    }
    if let Ok(v) = env::var("FLOCKD_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("FLOCKD_LOG_LEVEL".to_string());
    }
    // Also honor the conventional filter variable
    if let Ok(v) = env::var("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    // Configured functions (FLOCKD_FUNCTION_<NAME>=ip[:port])
    for (key, value) in env::vars() {
        if let Some(function_name) = key.strip_prefix("FLOCKD_FUNCTION_") {
            let function_key = function_name.to_lowercase();
            config.bootstrap.functions.insert(function_key, value);
            sources.env_overrides.push(key);
        }
    }
}

/// Expand a leading `~` or `$VAR` in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        PathBuf::from(path)
    } else if let Some(stripped) = path.strip_prefix('$') {
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                return PathBuf::from(var_value).join(&stripped[slash_pos + 1..]);
            }
            PathBuf::from(path)
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_path_tilde() {
        let expanded = expand_path("~/flock/blobs");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("flock/blobs"));
    }

    #[test]
    fn expand_path_absolute() {
        assert_eq!(expand_path("/var/lib/flockd"), PathBuf::from("/var/lib/flockd"));
    }

    #[test]
    fn parse_minimal_toml() {
        let toml = r#"
[bind]
http_port = 9090
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.infra.bind.http_port, 9090);
        // Other values stay at defaults
        assert_eq!(config.infra.telemetry.log_level, "info");
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[bind]
http_port = 9000

[telemetry]
log_level = "debug"

[paths]
blob_dir = "/data/blobs"

[node]
name = "rack-3"

[bootstrap.functions]
echo = "127.0.0.1:8081"
resize = "10.62.0.4"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.infra.bind.http_port, 9000);
        assert_eq!(config.infra.telemetry.log_level, "debug");
        assert_eq!(config.infra.paths.blob_dir, PathBuf::from("/data/blobs"));
        assert_eq!(config.infra.node.name, "rack-3");
        assert_eq!(
            config.bootstrap.functions.get("echo"),
            Some(&"127.0.0.1:8081".to_string())
        );
        assert_eq!(
            config.bootstrap.functions.get("resize"),
            Some(&"10.62.0.4".to_string())
        );
    }

    #[test]
    fn load_from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flockd.toml");
        std::fs::write(&path, "[bind]\nhttp_port = 8765\n").unwrap();

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.infra.bind.http_port, 8765);

        let missing = load_from_file(&dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::FileRead { .. })));
    }

    #[test]
    fn merge_prefers_overlay_changes() {
        let base = parse_toml("[bind]\nhttp_port = 9000\n", Path::new("a.toml")).unwrap();
        let overlay = parse_toml("[node]\nname = \"late\"\n", Path::new("b.toml")).unwrap();
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.infra.bind.http_port, 9000);
        assert_eq!(merged.infra.node.name, "late");
    }
}

//! Client configuration and layered loading.
//!
//! The priority chain (later overrides earlier):
//! 1. Built-in defaults ([`ClientConfig::default()`])
//! 2. User-level: `~/.devtap/config.toml`
//! 3. Workspace-level: `./.devtap/config.toml`
//! 4. An explicit file passed by the caller (e.g. `--config`)
//! 5. `DEVTAP_*` environment variables

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CdpError;

/// Maximum config file size in bytes.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Tunables for a DevTools connection and the helpers built on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Largest inbound message accepted, in bytes. Larger messages are a
    /// transport failure.
    pub max_message_size: usize,
    /// Largest single WebSocket frame accepted, in bytes.
    pub max_frame_size: usize,
    /// Default depth for node-describing calls.
    pub description_depth: u32,
    /// Prefix for generated object group names.
    pub object_group_prefix: String,
    /// Timeout for the HTTP target listing, in milliseconds.
    pub discovery_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_message_size: 16 * 1024 * 1024,
            max_frame_size: 16 * 1024 * 1024,
            description_depth: 1,
            object_group_prefix: "devtap".into(),
            discovery_timeout_ms: 5_000,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), CdpError> {
        if self.max_message_size == 0 || self.max_frame_size == 0 {
            return Err(CdpError::Config(
                "message and frame size limits must be non-zero".into(),
            ));
        }
        if self.max_frame_size > self.max_message_size {
            return Err(CdpError::Config(format!(
                "max_frame_size ({}) exceeds max_message_size ({})",
                self.max_frame_size, self.max_message_size
            )));
        }
        if self.object_group_prefix.is_empty() {
            return Err(CdpError::Config("object_group_prefix must not be empty".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Environment variable to config key.
struct EnvMapping {
    env_var: &'static str,
    key: &'static str,
    numeric: bool,
}

const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        env_var: "DEVTAP_MAX_MESSAGE_SIZE",
        key: "max_message_size",
        numeric: true,
    },
    EnvMapping {
        env_var: "DEVTAP_MAX_FRAME_SIZE",
        key: "max_frame_size",
        numeric: true,
    },
    EnvMapping {
        env_var: "DEVTAP_DESCRIPTION_DEPTH",
        key: "description_depth",
        numeric: true,
    },
    EnvMapping {
        env_var: "DEVTAP_OBJECT_GROUP_PREFIX",
        key: "object_group_prefix",
        numeric: false,
    },
    EnvMapping {
        env_var: "DEVTAP_DISCOVERY_TIMEOUT_MS",
        key: "discovery_timeout_ms",
        numeric: true,
    },
];

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Layered configuration loader.
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
    workspace_config_path: Option<PathBuf>,
    explicit_path: Option<PathBuf>,
    env: EnvLookup,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            user_config_path: None,
            workspace_config_path: None,
            explicit_path: None,
            env: Box::new(|name| std::env::var(name).ok()),
        }
    }

    #[must_use]
    pub fn with_user_path(mut self, path: PathBuf) -> Self {
        self.user_config_path = Some(path);
        self
    }

    #[must_use]
    pub fn with_workspace_path(mut self, path: PathBuf) -> Self {
        self.workspace_config_path = Some(path);
        self
    }

    /// Add a file that must exist and overrides both default locations.
    #[must_use]
    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.explicit_path = Some(path);
        self
    }

    /// Replace the environment lookup (tests use a fixed map).
    #[must_use]
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Box::new(lookup);
        self
    }

    /// Load, merge, and validate the configuration.
    pub fn load(&self) -> Result<ClientConfig, CdpError> {
        let mut merged = toml::Value::try_from(ClientConfig::default())
            .map_err(|e| CdpError::Config(format!("failed to serialize defaults: {e}")))?;

        let user_path = self.user_config_path.clone().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
            PathBuf::from(home).join(".devtap").join("config.toml")
        });
        let workspace_path = self
            .workspace_config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(".devtap/config.toml"));

        for path in [&user_path, &workspace_path] {
            if path.exists() {
                merge_file(&mut merged, path)?;
            }
        }
        if let Some(path) = &self.explicit_path {
            merge_file(&mut merged, path)?;
        }

        self.apply_env_overrides(&mut merged)?;

        let config: ClientConfig = merged
            .try_into()
            .map_err(|e| CdpError::Config(format!("failed to parse merged config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&self, merged: &mut toml::Value) -> Result<(), CdpError> {
        let toml::Value::Table(table) = merged else {
            return Ok(());
        };
        for mapping in ENV_MAPPINGS {
            let Some(raw) = (self.env)(mapping.env_var) else {
                continue;
            };
            if raw.chars().any(char::is_control) {
                return Err(CdpError::Config(format!(
                    "environment variable {} contains control characters",
                    mapping.env_var
                )));
            }
            let value = if mapping.numeric {
                let n = raw
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .and_then(|n| i64::try_from(n).ok())
                    .ok_or_else(|| {
                        CdpError::Config(format!(
                            "environment variable {} must be a non-negative integer, got {raw:?}",
                            mapping.env_var
                        ))
                    })?;
                toml::Value::Integer(n)
            } else {
                toml::Value::String(raw)
            };
            table.insert(mapping.key.to_string(), value);
        }
        Ok(())
    }
}

fn merge_file(merged: &mut toml::Value, path: &Path) -> Result<(), CdpError> {
    let content = read_config_file(path)?;
    let layer: toml::Value = toml::from_str(&content)
        .map_err(|e| CdpError::Config(format!("invalid config {}: {e}", path.display())))?;
    deep_merge(merged, &layer);
    tracing::debug!(path = %path.display(), "loaded config layer");
    Ok(())
}

/// Read a config file, rejecting oversized or binary content.
fn read_config_file(path: &Path) -> Result<String, CdpError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        CdpError::Config(format!("cannot read config file {}: {e}", path.display()))
    })?;

    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(CdpError::Config(format!(
            "config file {} exceeds maximum size of {} bytes (actual: {} bytes)",
            path.display(),
            MAX_CONFIG_FILE_SIZE,
            metadata.len()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        CdpError::Config(format!("cannot read config file {}: {e}", path.display()))
    })?;
    if content.contains('\0') {
        return Err(CdpError::Config(format!(
            "config file {} contains null bytes",
            path.display()
        )));
    }
    Ok(content)
}

/// Deep-merge `overlay` into `base`. Tables merge key by key; anything
/// else is replaced.
fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                if let Some(base_val) = base_table.get_mut(key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write_config(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn isolated(tmp: &TempDir) -> ConfigLoader {
        ConfigLoader::new()
            .with_user_path(tmp.path().join("missing-user.toml"))
            .with_workspace_path(tmp.path().join("missing-workspace.toml"))
            .with_env(|_| None)
    }

    #[test]
    fn defaults_when_nothing_is_present() {
        let tmp = TempDir::new().unwrap();
        let config = isolated(&tmp).load().unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.max_message_size, 16 * 1024 * 1024);
    }

    #[test]
    fn later_layers_override_earlier_ones() {
        let tmp = TempDir::new().unwrap();
        let user = write_config(
            tmp.path(),
            "user.toml",
            "description_depth = 3\nobject_group_prefix = \"user\"\n",
        );
        let workspace = write_config(tmp.path(), "ws.toml", "description_depth = 5\n");

        let config = ConfigLoader::new()
            .with_user_path(user)
            .with_workspace_path(workspace)
            .with_env(|_| None)
            .load()
            .unwrap();
        assert_eq!(config.description_depth, 5);
        assert_eq!(config.object_group_prefix, "user");
    }

    #[test]
    fn env_overrides_files() {
        let tmp = TempDir::new().unwrap();
        let file = write_config(tmp.path(), "explicit.toml", "discovery_timeout_ms = 100\n");
        let env: HashMap<&str, &str> = [
            ("DEVTAP_DISCOVERY_TIMEOUT_MS", "250"),
            ("DEVTAP_OBJECT_GROUP_PREFIX", "custom"),
        ]
        .into_iter()
        .collect();

        let config = isolated(&tmp)
            .with_file(file)
            .with_env(move |name| env.get(name).map(|v| v.to_string()))
            .load()
            .unwrap();
        assert_eq!(config.discovery_timeout_ms, 250);
        assert_eq!(config.object_group_prefix, "custom");
    }

    #[test]
    fn bad_env_number_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = isolated(&tmp)
            .with_env(|name| (name == "DEVTAP_DESCRIPTION_DEPTH").then(|| "deep".to_string()))
            .load()
            .unwrap_err();
        assert!(matches!(err, CdpError::Config(_)));
    }

    #[test]
    fn negative_env_number_is_rejected_by_name() {
        let tmp = TempDir::new().unwrap();
        let err = isolated(&tmp)
            .with_env(|name| (name == "DEVTAP_DISCOVERY_TIMEOUT_MS").then(|| "-5".to_string()))
            .load()
            .unwrap_err();
        let CdpError::Config(message) = err else {
            panic!("expected a config error, got {err:?}");
        };
        assert!(message.contains("DEVTAP_DISCOVERY_TIMEOUT_MS"));
        assert!(message.contains("non-negative integer"));
    }

    #[test]
    fn oversized_and_null_byte_files_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let big = write_config(
            tmp.path(),
            "big.toml",
            &"# padding\n".repeat((MAX_CONFIG_FILE_SIZE as usize / 10) + 10),
        );
        assert!(isolated(&tmp).with_file(big).load().is_err());

        let nul = write_config(tmp.path(), "nul.toml", "description_depth = 1\0\n");
        assert!(isolated(&tmp).with_file(nul).load().is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = isolated(&tmp)
            .with_file(tmp.path().join("nope.toml"))
            .load()
            .unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }

    #[test]
    fn validation_rejects_inconsistent_limits() {
        let config = ClientConfig {
            max_frame_size: 2048,
            max_message_size: 1024,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn deep_merge_replaces_scalars() {
        let mut base: toml::Value = toml::from_str("a = 1\nb = 2").unwrap();
        let overlay: toml::Value = toml::from_str("b = 3\nc = 4").unwrap();
        deep_merge(&mut base, &overlay);
        assert_eq!(base["a"].as_integer(), Some(1));
        assert_eq!(base["b"].as_integer(), Some(3));
        assert_eq!(base["c"].as_integer(), Some(4));
    }
}

use std::path::Path;

use serde::Deserialize;

use crate::role::Role;

/// Error type for configuration operations.
#[derive(Debug)]
pub enum ConfigError {
    /// An I/O or YAML parsing error occurred while loading the config file.
    Load(String),
    /// The value could not be converted to the requested type.
    TypeMismatch { key: String, expected: &'static str },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Load(msg) => write!(f, "Config load error: {msg}"),
            ConfigError::TypeMismatch { key, expected } => {
                write!(f, "Config type mismatch for '{key}': expected {expected}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Dashboard core configuration.
///
/// Resolution order (lowest to highest priority):
/// 1. `vigil.yaml` in the working directory (optional)
/// 2. Environment variables (`VIGIL_LOGIN_PATH`, `VIGIL_DEFAULT_ROLE`,
///    `VIGIL_ROLE_DOMAIN_SUFFIX`)
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    /// Where unauthenticated users are sent.
    pub login_path: String,
    /// Role applied when an identifier carries no recognized role token.
    pub default_role: Role,
    /// Top-level component stripped from the identifier's domain, kept for
    /// diagnostics only (role extraction takes the label before it).
    pub role_domain_suffix: String,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            login_path: "/auth/login".to_string(),
            default_role: Role::Admin,
            role_domain_suffix: "tn".to_string(),
        }
    }
}

impl VigilConfig {
    /// Load configuration from `vigil.yaml` (if present) plus environment
    /// variables. Env vars win over file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new("vigil.yaml"))
    }

    /// Load from a specific file path, then overlay environment variables.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
            serde_yaml::from_str(&raw)
                .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?
        } else {
            Self::default()
        };
        config.overlay_env()?;
        Ok(config)
    }

    fn overlay_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = std::env::var("VIGIL_LOGIN_PATH") {
            self.login_path = value;
        }
        if let Ok(value) = std::env::var("VIGIL_DEFAULT_ROLE") {
            self.default_role = value.parse().map_err(|_| ConfigError::TypeMismatch {
                key: "VIGIL_DEFAULT_ROLE".to_string(),
                expected: "one of: admin, supadmin, technician",
            })?;
        }
        if let Ok(value) = std::env::var("VIGIL_ROLE_DOMAIN_SUFFIX") {
            self.role_domain_suffix = value;
        }
        Ok(())
    }
}

use std::path::PathBuf;

use haven_core::safety::SafetyConfig;
use haven_core::tenants::TenantId;

use crate::state::SignupGate;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: {message}")]
    Invalid { var: &'static str, message: String },

    #[error("failed to read safety config {path}: {source}")]
    SafetyFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid safety config: {0}")]
    Safety(#[from] haven_core::error::CoreError),
}

/// Tenant seeded at startup so a fresh deployment has a working key.
#[derive(Debug, Clone)]
pub struct BootstrapTenant {
    pub tenant_id: TenantId,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub bootstrap: Option<BootstrapTenant>,
    pub safety_config_path: Option<PathBuf>,
    pub signup_gate: SignupGate,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                var: "PORT",
                message: e.to_string(),
            })?,
            None => 3000,
        };

        let cors_origins = lookup("HAVEN_CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000".to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let bootstrap_vars = (
            lookup("HAVEN_BOOTSTRAP_TENANT"),
            lookup("HAVEN_BOOTSTRAP_API_KEY"),
        );
        let bootstrap = match bootstrap_vars {
            (Some(tenant), Some(api_key)) => {
                let tenant_id = TenantId::parse(&tenant).map_err(|e| ConfigError::Invalid {
                    var: "HAVEN_BOOTSTRAP_TENANT",
                    message: e.to_string(),
                })?;
                if !haven_core::auth::looks_like_api_key(&api_key) {
                    return Err(ConfigError::Invalid {
                        var: "HAVEN_BOOTSTRAP_API_KEY",
                        message: "expected a haven_sk_ key".to_string(),
                    });
                }
                Some(BootstrapTenant { tenant_id, api_key })
            }
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid {
                    var: "HAVEN_BOOTSTRAP_TENANT",
                    message: "HAVEN_BOOTSTRAP_TENANT and HAVEN_BOOTSTRAP_API_KEY \
                              must be set together"
                        .to_string(),
                });
            }
        };

        let signup_gate = SignupGate::parse(lookup("HAVEN_SIGNUP_GATE").as_deref().unwrap_or(""));

        Ok(Self {
            port,
            cors_origins,
            bootstrap,
            safety_config_path: lookup("HAVEN_SAFETY_CONFIG").map(PathBuf::from),
            signup_gate,
        })
    }

    /// Built-in rules unless `HAVEN_SAFETY_CONFIG` points at a JSON file.
    pub fn load_safety_config(&self) -> Result<SafetyConfig, ConfigError> {
        let Some(path) = &self.safety_config_path else {
            return Ok(SafetyConfig::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::SafetyFile {
            path: path.clone(),
            source,
        })?;
        Ok(SafetyConfig::from_json(&raw)?)
    }
}

use std::time::Duration;

use thiserror::Error;

use crate::expiry;
use crate::lifecycle::ExpiryDefaults;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub node: NodeConfig,
    pub expiry: ExpiryConfig,
    /// API keys and the contexts they authenticate as. Empty means the
    /// service runs unauthenticated.
    pub api_contexts: Vec<ApiContext>,
    /// Context allowed to see and delete every record.
    pub super_context: String,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    /// Directory holding the redb file
    pub data_dir: String,
    /// Directory holding one subdirectory per upload
    pub storage_dir: String,
    /// Publicly visible base URL used to build download links
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Pause between two sweeps
    pub clean_interval: Duration,
    /// Lifetime of `asap` uploads nobody ever downloads (seconds)
    pub default_upload_expire: u64,
    /// Lifetime of `asap` forms nobody ever uses (seconds)
    pub default_form_expire: u64,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ApiContext {
    pub context: String,
    pub key: String,
}

impl std::fmt::Debug for ApiContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiContext")
            .field("context", &self.context)
            .field("key", &"<redacted>")
            .finish()
    }
}

const DEFAULT_EXPIRE: &str = "30d";

impl Default for ExpiryConfig {
    fn default() -> Self {
        let default_expire = expiry::duration_to_seconds(DEFAULT_EXPIRE);
        Self {
            clean_interval: Duration::from_secs(10),
            default_upload_expire: default_expire,
            default_form_expire: default_expire,
        }
    }
}

impl ExpiryConfig {
    pub fn defaults(&self) -> ExpiryDefaults {
        ExpiryDefaults {
            upload_secs: self.default_upload_expire,
            form_secs: self.default_form_expire,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let vars: Vec<(String, String)> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Build a configuration from `(name, value)` pairs.
    pub fn from_vars(vars: &[(String, String)]) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            vars.iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .filter(|v| !v.is_empty())
        };

        let bind_address = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let data_dir = var("DATA_DIR").unwrap_or_else(|| "./data".to_string());
        let storage_dir = var("STORAGE_DIR").unwrap_or_else(|| "./storage".to_string());
        let public_url = var("PUBLIC_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| default_public_url(&bind_address));

        let clean_interval = match var("CLEAN_INTERVAL") {
            Some(s) => Duration::from_secs(s.parse().map_err(|_| {
                ConfigError::ValidationError(format!("CLEAN_INTERVAL must be seconds, got '{s}'"))
            })?),
            None => Duration::from_secs(10),
        };

        let default_expire = var("DEFAULT_EXPIRE").unwrap_or_else(|| DEFAULT_EXPIRE.to_string());
        let default_upload_expire = expiry::duration_to_seconds(&default_expire);
        let default_form_expire = var("DEFAULT_FORM_EXPIRE")
            .map(|s| expiry::duration_to_seconds(&s))
            .unwrap_or(default_upload_expire);

        let max_upload_size = var("MAX_UPLOAD_SIZE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(50 * 1024 * 1024); // 50MB

        let mut api_contexts = var("API_CONTEXTS")
            .map(|s| parse_api_contexts(&s))
            .transpose()?
            .unwrap_or_default();

        // CONTEXT_<NAME>=context:key, handy for secrets injected one per variable
        let mut named: Vec<&(String, String)> = vars
            .iter()
            .filter(|(k, v)| k.starts_with("CONTEXT_") && !v.is_empty())
            .collect();
        named.sort();
        for (name, value) in named {
            api_contexts.push(parse_api_context(value).ok_or_else(|| {
                ConfigError::ValidationError(format!("{name} must look like 'context:key'"))
            })?);
        }

        let config = Config {
            node: NodeConfig {
                bind_address,
                data_dir,
                storage_dir,
                public_url,
            },
            expiry: ExpiryConfig {
                clean_interval,
                default_upload_expire,
                default_form_expire,
            },
            api_contexts,
            super_context: var("SUPER_CONTEXT").unwrap_or_default(),
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.expiry.clean_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "CLEAN_INTERVAL must be greater than 0".to_string(),
            ));
        }

        if self.expiry.default_upload_expire == 0 || self.expiry.default_form_expire == 0 {
            return Err(ConfigError::ValidationError(
                "DEFAULT_EXPIRE and DEFAULT_FORM_EXPIRE must be durations like '30d' or '12h'"
                    .to_string(),
            ));
        }

        if self.node.data_dir == self.node.storage_dir {
            return Err(ConfigError::ValidationError(
                "DATA_DIR and STORAGE_DIR must differ".to_string(),
            ));
        }

        for (i, ctx) in self.api_contexts.iter().enumerate() {
            if self.api_contexts[..i].iter().any(|c| c.key == ctx.key) {
                return Err(ConfigError::ValidationError(format!(
                    "API key for context '{}' is configured more than once",
                    ctx.context
                )));
            }
        }

        if !self.super_context.is_empty()
            && !self
                .api_contexts
                .iter()
                .any(|c| c.context == self.super_context)
        {
            tracing::warn!(
                super_context = %self.super_context,
                "SUPER_CONTEXT does not match any configured API context"
            );
        }

        Ok(())
    }

    /// Running without API keys: every caller is public.
    pub fn is_public(&self) -> bool {
        self.api_contexts.is_empty()
    }
}

fn default_public_url(bind_address: &str) -> String {
    match bind_address.strip_prefix("0.0.0.0") {
        Some(port) => format!("http://localhost{port}"),
        None if bind_address.starts_with(':') => format!("http://localhost{bind_address}"),
        None => format!("http://{bind_address}"),
    }
}

fn parse_api_context(pair: &str) -> Option<ApiContext> {
    let (context, key) = pair.trim().split_once(':')?;
    if context.is_empty() || key.is_empty() {
        return None;
    }
    Some(ApiContext {
        context: context.to_string(),
        key: key.to_string(),
    })
}

fn parse_api_contexts(list: &str) -> Result<Vec<ApiContext>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            parse_api_context(s).ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "API_CONTEXTS entries must look like 'context:key', got '{s}'"
                ))
            })
        })
        .collect()
}

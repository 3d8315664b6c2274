//! Connection settings, resolved once at startup and passed into the store.

/// Application-level constants
pub const APP_NAME: &str = "patient-store";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variables read by [`StoreConfig::from_env`].
pub const URL_VAR: &str = "PATIENT_STORE_URL";
pub const API_KEY_VAR: &str = "PATIENT_STORE_API_KEY";
pub const TIMEOUT_VAR: &str = "PATIENT_STORE_TIMEOUT_SECS";

/// Request timeout when none is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "patient_store=info,warn"
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("Service URL must start with http:// or https://, got {0}")]
    InvalidUrl(String),
    #[error("API key cannot be empty")]
    EmptyApiKey,
    #[error("Invalid request timeout: {0}")]
    InvalidTimeout(String),
}

/// Where the patient service lives and how to authenticate against it.
#[derive(Clone)]
pub struct StoreConfig {
    base_url: String,
    api_key: String,
    timeout_secs: u64,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl StoreConfig {
    /// Validate and normalise settings supplied directly.
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self, ConfigError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(base_url.to_string()));
        }
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(ConfigError::EmptyApiKey);
        }
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("must be greater than zero".into()));
        }

        Ok(Self {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            timeout_secs,
        })
    }

    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, so callers (and tests) choose the source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(URL_VAR).ok_or(ConfigError::Missing(URL_VAR))?;
        let api_key = lookup(API_KEY_VAR).ok_or(ConfigError::Missing(API_KEY_VAR))?;
        let timeout_secs = match lookup(TIMEOUT_VAR).map(|v| v.trim().to_string()) {
            None => DEFAULT_TIMEOUT_SECS,
            Some(v) if v.is_empty() => DEFAULT_TIMEOUT_SECS,
            Some(v) => v
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidTimeout(v.clone()))?,
        };

        Self::new(&base_url, &api_key, timeout_secs)
    }

    /// Service root, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Key sent as both `apikey` and bearer token.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Per-request timeout in seconds.
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
}

use std::time::Duration;

/// Token used when `TOKEN` is not set. Matches the token test servers are started with.
pub const DEFAULT_TOKEN: &str = "BLOCK";
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8888";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 300;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Jupyter authentication token, sent as `Authorization: token <...>`
    pub token: String,
    /// Server URL used for notebooks that haven't been set up with an explicit one
    pub default_server_url: String,
    /// Bound on every REST call to the Jupyter server
    pub request_timeout: Duration,
    /// Bound on a single kernel execution, from request to idle
    pub execution_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `TOKEN`: Jupyter server token (default `BLOCK`)
    /// - `JUPYTER_SERVER_URL`: default server URL (default `http://localhost:8888`)
    /// - `MCP_JUPYTER_REQUEST_TIMEOUT_SECS`: REST timeout in seconds (default 10)
    /// - `MCP_JUPYTER_EXECUTION_TIMEOUT_SECS`: kernel execution timeout in seconds (default 300)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let token = lookup("TOKEN").unwrap_or_else(|| DEFAULT_TOKEN.to_string());
        let default_server_url = lookup("JUPYTER_SERVER_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

        let request_timeout = parse_secs(
            &lookup,
            "MCP_JUPYTER_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        let execution_timeout = parse_secs(
            &lookup,
            "MCP_JUPYTER_EXECUTION_TIMEOUT_SECS",
            DEFAULT_EXECUTION_TIMEOUT_SECS,
        )?;

        Ok(Self {
            token,
            default_server_url,
            request_timeout,
            execution_timeout,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: DEFAULT_TOKEN.to_string(),
            default_server_url: DEFAULT_SERVER_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            execution_timeout: Duration::from_secs(DEFAULT_EXECUTION_TIMEOUT_SECS),
        }
    }
}

fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
        None => Ok(Duration::from_secs(default)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be a whole number of seconds, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },
}

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use genqueue_client::connection::{stream_url, StreamError};
use genqueue_client::reconnect::ReconnectConfig;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_STATE_PATH: &str = "genqueue-state.json";

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// REST base URL; also the base for output image URLs.
    pub api_url: String,
    /// Push-channel URL.
    pub ws_url: String,
    pub page_size: usize,
    pub history_poll: Duration,
    pub reconnect: ReconnectConfig,
    /// Where selection and per-workflow inputs are saved on shutdown.
    pub state_path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got '{value}'")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl AppConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                    |
    /// |---------------------------------|----------------------------|
    /// | `GENQUEUE_API_URL`              | `http://127.0.0.1:8000`    |
    /// | `GENQUEUE_WS_URL`               | API URL with `ws(s)://` and path `/ws` |
    /// | `GENQUEUE_PAGE_SIZE`            | `20`                       |
    /// | `GENQUEUE_HISTORY_POLL_SECS`    | `30`                       |
    /// | `GENQUEUE_RECONNECT_INITIAL_MS` | `1000`                     |
    /// | `GENQUEUE_RECONNECT_MAX_SECS`   | `30`                       |
    /// | `GENQUEUE_STATE_PATH`           | `genqueue-state.json`      |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup("GENQUEUE_API_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.into());

        let ws_url = match lookup("GENQUEUE_WS_URL").filter(|url| !url.trim().is_empty()) {
            Some(url) => url.trim().to_string(),
            None => stream_url(&api_url)?,
        };

        let page_size: usize = positive(&lookup, "GENQUEUE_PAGE_SIZE", 20)?;
        let poll_secs: u64 = positive(&lookup, "GENQUEUE_HISTORY_POLL_SECS", 30)?;
        let initial_ms: u64 = positive(&lookup, "GENQUEUE_RECONNECT_INITIAL_MS", 1000)?;
        let max_secs: u64 = positive(&lookup, "GENQUEUE_RECONNECT_MAX_SECS", 30)?;

        let state_path = lookup("GENQUEUE_STATE_PATH")
            .filter(|path| !path.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_STATE_PATH.into());

        let initial_delay = Duration::from_millis(initial_ms);
        Ok(Self {
            api_url,
            ws_url,
            page_size,
            history_poll: Duration::from_secs(poll_secs),
            reconnect: ReconnectConfig {
                initial_delay,
                max_delay: Duration::from_secs(max_secs).max(initial_delay),
                ..Default::default()
            },
            state_path: PathBuf::from(state_path),
        })
    }
}

/// Parse a positive integer variable, falling back to `default` when unset.
fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            expected: "a positive integer",
        }),
    }
}

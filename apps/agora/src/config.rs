use std::env;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_PUSH_URL: &str = "ws://127.0.0.1:8080/ws";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("{var} is not a valid url ({value:?}): {source}")]
    InvalidUrl {
        var: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("{initial_var} ({initial:?}) exceeds {max_var} ({max:?})")]
    BackoffRange {
        initial_var: &'static str,
        initial: Duration,
        max_var: &'static str,
        max: Duration,
    },
}

/// Exponential reconnect delays: `initial`, doubling, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl ReconnectPolicy {
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub push_url: String,
    pub page_size: u32,
    pub scroll_throttle: Duration,
    pub reconnect: ReconnectPolicy,
    pub credentials_path: PathBuf,
}

impl Config {
    /// Load configuration from `AGORA_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let api_url = env::var("AGORA_API_URL").unwrap_or(defaults.api_url);
        let push_url = env::var("AGORA_PUSH_URL").unwrap_or(defaults.push_url);
        let page_size = number_var("AGORA_PAGE_SIZE")?.unwrap_or(u64::from(defaults.page_size));
        let scroll_throttle = number_var("AGORA_SCROLL_THROTTLE_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.scroll_throttle);
        let initial = number_var("AGORA_RECONNECT_INITIAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.reconnect.initial);
        let max = number_var("AGORA_RECONNECT_MAX_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.reconnect.max);
        if initial > max {
            return Err(ConfigError::BackoffRange {
                initial_var: "AGORA_RECONNECT_INITIAL_MS",
                initial,
                max_var: "AGORA_RECONNECT_MAX_MS",
                max,
            });
        }
        let credentials_path = env::var_os("AGORA_CREDENTIALS_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.credentials_path);

        Ok(Self {
            api_url: checked_url("AGORA_API_URL", &api_url)?,
            push_url: checked_url("AGORA_PUSH_URL", &push_url)?,
            page_size: u32::try_from(page_size).map_err(|_| ConfigError::InvalidNumber {
                var: "AGORA_PAGE_SIZE",
                value: page_size.to_string(),
            })?,
            scroll_throttle,
            reconnect: ReconnectPolicy { initial, max },
            credentials_path,
        })
    }
}

impl Config {
    /// The server's session cookie lives next to the credentials file.
    pub fn cookie_path(&self) -> PathBuf {
        self.credentials_path.with_extension("cookie")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            push_url: DEFAULT_PUSH_URL.to_string(),
            page_size: 10,
            scroll_throttle: Duration::from_millis(300),
            reconnect: ReconnectPolicy::default(),
            credentials_path: default_credentials_path(),
        }
    }
}

pub fn default_credentials_path() -> PathBuf {
    ProjectDirs::from("", "", "agora")
        .map(|dirs| dirs.config_dir().join("credentials.json"))
        .unwrap_or_else(|| PathBuf::from(".agora-credentials.json"))
}

/// Rewrites `localhost` to `127.0.0.1` so the client never dials `::1`.
pub fn normalize_localhost(url: &str) -> String {
    url.replacen("localhost", "127.0.0.1", 1)
}

/// Normalizes `value` and checks that it parses as an absolute url.
pub fn checked_url(var: &'static str, value: &str) -> Result<String, ConfigError> {
    let value = normalize_localhost(value.trim());
    match Url::parse(&value) {
        Ok(_) => Ok(value),
        Err(source) => Err(ConfigError::InvalidUrl { var, value, source }),
    }
}

fn number_var(var: &'static str) -> Result<Option<u64>, ConfigError> {
    match env::var(var) {
        Ok(value) => match value.trim().parse::<u64>() {
            Ok(number) if number > 0 => Ok(Some(number)),
            _ => Err(ConfigError::InvalidNumber { var, value }),
        },
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Mutex to ensure environment variable tests don't run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const VARS: [&str; 7] = [
        "AGORA_API_URL",
        "AGORA_PUSH_URL",
        "AGORA_PAGE_SIZE",
        "AGORA_SCROLL_THROTTLE_MS",
        "AGORA_RECONNECT_INITIAL_MS",
        "AGORA_RECONNECT_MAX_MS",
        "AGORA_CREDENTIALS_PATH",
    ];

    fn clear_vars() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_config_from_env_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();

        let config = Config::from_env().unwrap();
        assert_eq!(config.api_url, "http://127.0.0.1:8080");
        assert_eq!(config.push_url, "ws://127.0.0.1:8080/ws");
        assert_eq!(config.page_size, 10);
        assert_eq!(config.scroll_throttle, Duration::from_millis(300));
        assert_eq!(config.reconnect, ReconnectPolicy::default());
        assert!(config.credentials_path.ends_with("credentials.json"));
    }

    #[test]
    fn test_config_from_env_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();
        unsafe {
            env::set_var("AGORA_PUSH_URL", "ws://localhost:9000/ws");
            env::set_var("AGORA_PAGE_SIZE", "25");
            env::set_var("AGORA_RECONNECT_INITIAL_MS", "100");
            env::set_var("AGORA_CREDENTIALS_PATH", "/tmp/agora/creds.json");
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.push_url, "ws://127.0.0.1:9000/ws");
        assert_eq!(config.page_size, 25);
        assert_eq!(config.reconnect.initial, Duration::from_millis(100));
        assert_eq!(config.credentials_path, PathBuf::from("/tmp/agora/creds.json"));
        assert_eq!(config.cookie_path(), PathBuf::from("/tmp/agora/creds.cookie"));

        clear_vars();
    }

    #[test]
    fn test_config_rejects_bad_numbers() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();
        unsafe {
            env::set_var("AGORA_PAGE_SIZE", "0");
        }
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidNumber { var: "AGORA_PAGE_SIZE", .. })
        ));

        unsafe {
            env::set_var("AGORA_PAGE_SIZE", "10");
            env::set_var("AGORA_RECONNECT_INITIAL_MS", "60000");
        }
        assert!(matches!(Config::from_env(), Err(ConfigError::BackoffRange { .. })));

        unsafe {
            env::set_var("AGORA_RECONNECT_INITIAL_MS", "100");
            env::set_var("AGORA_API_URL", "http://[::1");
        }
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidUrl { var: "AGORA_API_URL", .. })
        ));

        clear_vars();
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let policy = ReconnectPolicy {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(2),
        };
        let second = policy.next_delay(policy.initial);
        assert_eq!(second, Duration::from_secs(1));
        let third = policy.next_delay(second);
        assert_eq!(third, Duration::from_secs(2));
        assert_eq!(policy.next_delay(third), Duration::from_secs(2));
    }
}

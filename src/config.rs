use std::str::FromStr;
use std::time::Duration;

use log::LevelFilter;
use thiserror::Error;

pub const DEFAULT_ENDPOINT: &str = "https://logging.googleapis.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't parse env var {key} ({value:?})")]
    Invalid { key: &'static str, value: String },
}

/// Settings read from the environment (and an optional `.env` file).
#[derive(Clone)]
pub struct Config {
    /// `GCP_CLF_ACCESS_TOKEN`, fixed OAuth2 bearer token used instead of the
    /// application default credentials, e.g. from
    /// `gcloud auth print-access-token`
    pub access_token: Option<String>,
    /// `GCP_CLF_ENDPOINT`
    pub endpoint: String,
    /// `GCP_CLF_TAIL_POLL_SECONDS`
    pub tail_poll: Duration,
    /// `GCP_CLF_TAIL_LAG_SECONDS`, how late an entry may show up in the
    /// backend and still be picked up by a tail
    pub tail_lag: Duration,
    /// `GCP_CLF_MAX_RETRIES`
    pub max_retries: usize,
    /// `GCP_CLF_LOG_LEVEL`
    pub log_level: LevelFilter,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("tail_poll", &self.tail_poll)
            .field("tail_lag", &self.tail_lag)
            .field("max_retries", &self.max_retries)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            access_token: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            tail_poll: Duration::from_secs(5),
            tail_lag: Duration::from_secs(30),
            max_retries: 8,
            log_level: LevelFilter::Info,
        }
    }
}

impl Config {
    /// Read the config from the process environment.
    ///
    /// Call `dotenv::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|key| dotenv::var(key).ok())
    }

    /// Read the config through `lookup`, unset variables fall back to their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value })
        }

        let defaults = Config::default();
        let get = |key: &'static str| lookup(key).filter(|v: &String| !v.trim().is_empty());

        Ok(Config {
            access_token: get("GCP_CLF_ACCESS_TOKEN").map(|t| t.trim().to_string()),
            endpoint: get("GCP_CLF_ENDPOINT")
                .map(|e| e.trim_end_matches('/').to_string())
                .unwrap_or(defaults.endpoint),
            tail_poll: match get("GCP_CLF_TAIL_POLL_SECONDS") {
                Some(v) => Duration::from_secs(parse("GCP_CLF_TAIL_POLL_SECONDS", v)?),
                None => defaults.tail_poll,
            },
            tail_lag: match get("GCP_CLF_TAIL_LAG_SECONDS") {
                Some(v) => Duration::from_secs(parse("GCP_CLF_TAIL_LAG_SECONDS", v)?),
                None => defaults.tail_lag,
            },
            max_retries: match get("GCP_CLF_MAX_RETRIES") {
                Some(v) => parse("GCP_CLF_MAX_RETRIES", v)?,
                None => defaults.max_retries,
            },
            log_level: match get("GCP_CLF_LOG_LEVEL") {
                Some(v) => parse("GCP_CLF_LOG_LEVEL", v)?,
                None => defaults.log_level,
            },
        })
    }
}

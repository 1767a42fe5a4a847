use std::{env, fmt::Display, net::SocketAddr, path::PathBuf, str::FromStr};

use thiserror::Error;
use tracing::info;

pub const DEFAULT_TWITTER_API_URL: &str = "https://api.twitter.com/2/tweets/search/recent";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid {key} value: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_dir: PathBuf,
    pub static_dir: PathBuf,
    pub twitter_api_url: url::Url,
    pub twitter_bearer_token: String,
    pub twitter_max_results: u32,
}

impl Config {
    /// Reads the configuration from the process environment (and `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let twitter_max_results: u32 = try_load(&lookup, "TWITTER_MAX_RESULTS", "100")?;
        if !(10..=100).contains(&twitter_max_results) {
            return Err(ConfigError::Invalid {
                key: "TWITTER_MAX_RESULTS",
                message: format!("{twitter_max_results} is outside 10..=100"),
            });
        }

        Ok(Self {
            bind_addr: try_load(&lookup, "BIND_ADDR", "0.0.0.0:3000")?,
            log_dir: try_load(&lookup, "LOG_DIR", "log")?,
            static_dir: try_load(&lookup, "STATIC_DIR", "static")?,
            twitter_api_url: try_load(&lookup, "TWITTER_API_URL", DEFAULT_TWITTER_API_URL)?,
            twitter_bearer_token: lookup("TWITTER_BEARER_TOKEN")
                .filter(|token| !token.is_empty())
                .ok_or(ConfigError::Missing("TWITTER_BEARER_TOKEN"))?,
            twitter_max_results,
        })
    }
}

fn try_load<F, T>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    lookup(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| ConfigError::Invalid {
            key,
            message: e.to_string(),
        })
}

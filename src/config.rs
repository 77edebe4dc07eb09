use anyhow::{bail, Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::tmdb::TMDB_BASE;

const DEFAULT_BIND: &str = "0.0.0.0:3146";
const DEFAULT_DATA_PATH: &str = "data/moviesprix.json";
const DEFAULT_DEBOUNCE_MS: u64 = 300;

#[derive(Debug, Clone)]
pub struct Config {
    pub tmdb_api_key: String,
    pub tmdb_base_url: String,
    pub session_secret: String,
    pub bind_addr: SocketAddr,
    pub data_path: PathBuf,
    pub search_debounce: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            match lookup(key).filter(|v| !v.trim().is_empty()) {
                Some(v) => Ok(v),
                None => bail!("Missing required environment variable: {}", key),
            }
        };
        let tmdb_api_key = required("TMDB_API_KEY")?;
        let session_secret = required("SESSION_SECRET")?;
        info!("All required environment variables are set");

        let tmdb_base_url = lookup("TMDB_BASE_URL").unwrap_or_else(|| TMDB_BASE.to_string());
        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse()
            .context("BIND_ADDR must be a socket address like 0.0.0.0:3146")?;
        let data_path = lookup("DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_PATH));
        let debounce_ms = match lookup("SEARCH_DEBOUNCE_MS") {
            Some(v) => v
                .trim()
                .parse()
                .context("SEARCH_DEBOUNCE_MS must be a whole number of milliseconds")?,
            None => DEFAULT_DEBOUNCE_MS,
        };

        Ok(Self {
            tmdb_api_key,
            tmdb_base_url,
            session_secret,
            bind_addr,
            data_path,
            search_debounce: Duration::from_millis(debounce_ms),
        })
    }
}

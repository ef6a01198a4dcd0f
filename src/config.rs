use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use dotenvy::dotenv;

use crate::attendance::policy::AttendancePolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    MySql,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(StorageBackend::MySql),
            "memory" => Ok(StorageBackend::Memory),
            other => bail!("unknown STORAGE_BACKEND '{other}', expected mysql or memory"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_addr: String,
    pub database_url: Option<String>,
    pub storage_backend: StorageBackend,
    pub tag_directory_file: Option<PathBuf>,
    pub api_prefix: String,
    pub log_dir: String,

    // Rate limiting
    pub rate_scan_per_min: u32,
    pub rate_query_per_min: u32,

    // Attendance windows, seconds unless noted
    pub debounce_secs: i64,
    pub replay_window_secs: i64,
    pub clock_skew_secs: i64,
    pub staleness_secs: i64,
    pub max_session_secs: i64,
    pub unknown_tag_cooldown_secs: i64,
    pub upstream_timeout_ms: u64,
    pub directory_cache_ttl_secs: u64,
    pub reconcile_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8080".to_string(),
            database_url: None,
            storage_backend: StorageBackend::MySql,
            tag_directory_file: None,
            api_prefix: "/api".to_string(),
            log_dir: "logs".to_string(),
            rate_scan_per_min: 600,
            rate_query_per_min: 1000,
            debounce_secs: 3,
            replay_window_secs: 5,
            clock_skew_secs: 120,
            staleness_secs: 86_400,
            max_session_secs: 64_800,
            unknown_tag_cooldown_secs: 600,
            upstream_timeout_ms: 3_000,
            directory_cache_ttl_secs: 30,
            reconcile_interval_secs: 300,
        }
    }
}

/// Parse `key` if set, otherwise keep `default`.
fn var_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}='{raw}': {e}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let defaults = Config::default();

        let storage_backend: StorageBackend = var_or("STORAGE_BACKEND", defaults.storage_backend)?;
        let database_url = env::var("DATABASE_URL").ok();
        if storage_backend == StorageBackend::MySql && database_url.is_none() {
            bail!("DATABASE_URL must be set when STORAGE_BACKEND=mysql");
        }

        Ok(Self {
            server_addr: env::var("SERVER_ADDR").context("SERVER_ADDR must be set")?,
            database_url,
            storage_backend,
            tag_directory_file: env::var("TAG_DIRECTORY_FILE").ok().map(PathBuf::from),
            api_prefix: env::var("API_PREFIX").unwrap_or(defaults.api_prefix),
            log_dir: env::var("LOG_DIR").unwrap_or(defaults.log_dir),

            rate_scan_per_min: var_or("RATE_SCAN_PER_MIN", defaults.rate_scan_per_min)?,
            rate_query_per_min: var_or("RATE_QUERY_PER_MIN", defaults.rate_query_per_min)?,

            debounce_secs: var_or("DEBOUNCE_SECS", defaults.debounce_secs)?,
            replay_window_secs: var_or("REPLAY_WINDOW_SECS", defaults.replay_window_secs)?,
            clock_skew_secs: var_or("CLOCK_SKEW_SECS", defaults.clock_skew_secs)?,
            staleness_secs: var_or("STALENESS_SECS", defaults.staleness_secs)?,
            max_session_secs: var_or("MAX_SESSION_SECS", defaults.max_session_secs)?,
            unknown_tag_cooldown_secs: var_or(
                "UNKNOWN_TAG_COOLDOWN_SECS",
                defaults.unknown_tag_cooldown_secs,
            )?,
            upstream_timeout_ms: var_or("UPSTREAM_TIMEOUT_MS", defaults.upstream_timeout_ms)?,
            directory_cache_ttl_secs: var_or(
                "DIRECTORY_CACHE_TTL_SECS",
                defaults.directory_cache_ttl_secs,
            )?,
            reconcile_interval_secs: var_or(
                "RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval_secs,
            )?,
        })
    }

    pub fn policy(&self) -> AttendancePolicy {
        AttendancePolicy {
            debounce: chrono::Duration::seconds(self.debounce_secs),
            replay_window: chrono::Duration::seconds(self.replay_window_secs),
            clock_skew: chrono::Duration::seconds(self.clock_skew_secs),
            staleness: chrono::Duration::seconds(self.staleness_secs),
            max_session: chrono::Duration::seconds(self.max_session_secs),
            unknown_tag_cooldown: chrono::Duration::seconds(self.unknown_tag_cooldown_secs),
            upstream_timeout: std::time::Duration::from_millis(self.upstream_timeout_ms),
        }
    }

    pub fn directory_cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.directory_cache_ttl_secs)
    }

    pub fn reconcile_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reconcile_interval_secs.max(1))
    }
}

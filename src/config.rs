#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::error::{HarvestError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = ".harvest/config.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestConfig {
    pub database_url: String,
    pub sessions_dir: PathBuf,
    pub bridge_url: String,
    pub api_id: i64,
    pub api_hash: String,
    pub worker_concurrency: u32,
    pub lease: Duration,
    pub flood_wait_ceiling: Duration,
    pub cooldown: Duration,
    pub reply_page_size: u32,
    pub log_level: String,
}

/// Values as written in the config file, before env overrides and defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawConfig {
    pub database_url: Option<String>,
    pub sessions_dir: Option<String>,
    pub bridge_url: Option<String>,
    pub api_id: Option<String>,
    pub api_hash: Option<String>,
    pub worker_concurrency: Option<String>,
    pub lease_ms: Option<String>,
    pub flood_wait_ceiling_secs: Option<String>,
    pub cooldown_ms: Option<String>,
    pub reply_page_size: Option<String>,
    pub log_level: Option<String>,
}

/// # Errors
/// Returns an error if the config file exists but cannot be read, or a value
/// does not parse.
pub async fn load_config(path: Option<PathBuf>) -> Result<HarvestConfig> {
    let config_path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let raw = read_raw_config(&config_path).await?;
    HarvestConfig::resolve(raw, non_empty_env_var)
}

async fn read_raw_config(config_path: &Path) -> Result<RawConfig> {
    if !config_path.exists() {
        return Ok(RawConfig::default());
    }

    tokio::fs::read_to_string(config_path)
        .await
        .map(|content| parse_config_content(&content))
        .map_err(|e| HarvestError::ConfigError(format!("Failed to read config: {e}")))
}

#[must_use]
pub fn parse_config_content(content: &str) -> RawConfig {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('['))
        .fold(RawConfig::default(), |mut raw, line| {
            let Some((key, value)) = line.split_once('=') else {
                return raw;
            };
            let value = Some(expand_env_vars(value.trim().trim_matches('"')));
            match key.trim() {
                "database_url" => raw.database_url = value,
                "sessions_dir" => raw.sessions_dir = value,
                "bridge_url" => raw.bridge_url = value,
                "api_id" => raw.api_id = value,
                "api_hash" => raw.api_hash = value,
                "worker_concurrency" => raw.worker_concurrency = value,
                "lease_ms" => raw.lease_ms = value,
                "flood_wait_ceiling_secs" => raw.flood_wait_ceiling_secs = value,
                "cooldown_ms" => raw.cooldown_ms = value,
                "reply_page_size" => raw.reply_page_size = value,
                "log_level" => raw.log_level = value,
                _ => {}
            }
            raw
        })
}

fn expand_env_vars(input: &str) -> String {
    expand_vars_with(input, |name| std::env::var(name).ok())
}

/// Substituted values are not expanded again.
fn expand_vars_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = input.to_string();
    let mut cursor = 0;
    while let Some(offset) = result[cursor..].find("${") {
        let start = cursor + offset;
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let var_part = &result[start + 2..start + end];
        let (var_name, default) = var_part.split_once(":-").unwrap_or((var_part, ""));
        let value = lookup(var_name).unwrap_or_else(|| default.to_string());
        result.replace_range(start..=(start + end), &value);
        cursor = start + value.len();
    }
    result
}

impl HarvestConfig {
    /// Environment wins over the file, the file wins over defaults.
    ///
    /// # Errors
    /// Returns `ConfigError` when a numeric key does not parse.
    pub fn resolve<F>(raw: RawConfig, env_lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |env_key: &str, file_value: Option<String>| env_lookup(env_key).or(file_value);

        let database_url = env_lookup("DATABASE_URL")
            .or(raw.database_url)
            .unwrap_or_else(|| computed_default_database_url(&env_lookup));

        Ok(Self {
            database_url,
            sessions_dir: PathBuf::from(
                pick("HARVEST_SESSIONS_DIR", raw.sessions_dir)
                    .unwrap_or_else(|| "accounts".to_string()),
            ),
            bridge_url: pick("HARVEST_BRIDGE_URL", raw.bridge_url)
                .unwrap_or_else(|| "http://localhost:8081".to_string()),
            api_id: parse_number("api_id", pick("HARVEST_API_ID", raw.api_id), 0)?,
            api_hash: pick("HARVEST_API_HASH", raw.api_hash).unwrap_or_default(),
            worker_concurrency: parse_number(
                "worker_concurrency",
                pick("HARVEST_WORKERS", raw.worker_concurrency),
                4,
            )?
            .max(1),
            lease: Duration::from_millis(parse_number(
                "lease_ms",
                pick("HARVEST_LEASE_MS", raw.lease_ms),
                300_000,
            )?),
            flood_wait_ceiling: Duration::from_secs(parse_number(
                "flood_wait_ceiling_secs",
                pick("HARVEST_FLOOD_WAIT_CEILING_SECS", raw.flood_wait_ceiling_secs),
                60,
            )?),
            cooldown: Duration::from_millis(parse_number(
                "cooldown_ms",
                pick("HARVEST_COOLDOWN_MS", raw.cooldown_ms),
                3_000,
            )?),
            reply_page_size: parse_number(
                "reply_page_size",
                pick("HARVEST_REPLY_PAGE_SIZE", raw.reply_page_size),
                100,
            )?
            .clamp(1, 100),
            log_level: pick("HARVEST_LOG_LEVEL", raw.log_level)
                .unwrap_or_else(|| "info".to_string()),
        })
    }

    /// The bridge refuses to open sessions without application credentials.
    ///
    /// # Errors
    /// Returns `ConfigError` if `api_id` or `api_hash` is unset.
    pub fn require_api_credentials(&self) -> Result<(i64, &str)> {
        if self.api_id <= 0 || self.api_hash.is_empty() {
            return Err(HarvestError::ConfigError(
                "api_id and api_hash must be set (HARVEST_API_ID / HARVEST_API_HASH)".to_string(),
            ));
        }
        Ok((self.api_id, &self.api_hash))
    }
}

fn parse_number<T>(key: &str, value: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.map_or(Ok(default), |raw| {
        raw.trim()
            .parse::<T>()
            .map_err(|e| HarvestError::ConfigError(format!("Invalid {key} '{raw}': {e}")))
    })
}

fn non_empty_env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn computed_default_database_url<F>(env_lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let user = env_lookup("POSTGRES_USER").unwrap_or_else(|| "harvester".to_string());
    let pass = env_lookup("POSTGRES_PASSWORD").unwrap_or_else(|| "harvester".to_string());
    let host = env_lookup("POSTGRES_HOST").unwrap_or_else(|| "localhost".to_string());
    let port = env_lookup("POSTGRES_PORT").unwrap_or_else(|| "5432".to_string());
    let db = env_lookup("POSTGRES_DB").unwrap_or_else(|| "channel_harvest".to_string());
    format!("postgres://{user}:{pass}@{host}:{port}/{db}")
}

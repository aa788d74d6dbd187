use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_MAX_DURATION_SECS: u64 = 30;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;
pub const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY not found. Please set it in your .env file")]
    MissingApiKey,

    #[error("Invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub bind: SocketAddr,
    /// Deadline for one provider call, start to last chunk.
    pub max_duration: Duration,
    pub channel_capacity: usize,
    pub max_body_bytes: usize,
    pub system_prompt: Option<String>,
}

impl Config {
    /// Reads the process environment. Call `dotenv` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars().collect())
    }

    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            vars.get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = get("OPENAI_API_KEY").ok_or(ConfigError::MissingApiKey)?;
        let model = get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let base_url = get("OPENAI_BASE_URL");

        let bind_raw = get("MURMUR_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                name: "MURMUR_BIND",
                value: bind_raw.clone(),
                reason: e.to_string(),
            })?;

        let max_duration_secs = parse_positive(
            "MURMUR_MAX_DURATION_SECS",
            get("MURMUR_MAX_DURATION_SECS"),
            DEFAULT_MAX_DURATION_SECS,
        )?;
        let channel_capacity = parse_positive(
            "MURMUR_CHANNEL_CAPACITY",
            get("MURMUR_CHANNEL_CAPACITY"),
            DEFAULT_CHANNEL_CAPACITY as u64,
        )? as usize;
        let max_body_bytes = parse_positive(
            "MURMUR_MAX_BODY_BYTES",
            get("MURMUR_MAX_BODY_BYTES"),
            DEFAULT_MAX_BODY_BYTES as u64,
        )? as usize;

        Ok(Self {
            api_key,
            model,
            base_url,
            bind,
            max_duration: Duration::from_secs(max_duration_secs),
            channel_capacity,
            max_body_bytes,
            system_prompt: get("MURMUR_SYSTEM_PROMPT"),
        })
    }
}

fn parse_positive(name: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            name,
            value: raw,
            reason: "must be greater than zero".to_string(),
        }),
        Ok(value) => Ok(value),
        Err(e) => Err(ConfigError::InvalidValue {
            name,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

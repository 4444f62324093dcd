use anyhow::{Context, Result, anyhow};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_addr: String,
    pub token_ttl: usize,

    // Rate limiting
    pub rate_login_per_min: u32,
    pub rate_register_per_min: u32,
    pub rate_protected_per_min: u32,

    pub api_prefix: String,

    // Attendance hub
    pub hub_channel_capacity: usize,
    pub hub_replay_capacity: usize,

    // Logging
    pub log_dir: String,
    pub log_level: tracing::Level,
}

fn required(key: &str) -> Result<String> {
    env::var(key).map_err(|_| anyhow!("{key} must be set"))
}

fn parsed_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let log_level = match env::var("LOG_LEVEL") {
            Ok(raw) => tracing::Level::from_str(raw.trim())
                .map_err(|_| anyhow!("LOG_LEVEL has an invalid value: {raw:?}"))?,
            Err(_) => tracing::Level::DEBUG,
        };

        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            token_ttl: parsed_or("TOKEN_TTL", 86_400)?, // 1 day

            rate_login_per_min: parsed_or("RATE_LOGIN_PER_MIN", 60)?,
            rate_register_per_min: parsed_or("RATE_REGISTER_PER_MIN", 30)?,
            rate_protected_per_min: parsed_or("RATE_PROTECTED_PER_MIN", 1000)?,

            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api".to_string()),

            hub_channel_capacity: parsed_or("HUB_CHANNEL_CAPACITY", 256)?,
            hub_replay_capacity: parsed_or("HUB_REPLAY_CAPACITY", 512)?,

            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
            log_level,
        })
    }
}

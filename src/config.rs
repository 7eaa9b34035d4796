use std::env;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub log_level: String,
    pub database_url: String,
    pub generation_endpoint: String,
    pub generation_api_key: String,
    pub generation_timeout_seconds: u64,
    pub generation_cost: i64,
    pub starting_credits: i64,
    pub exempt_user_ids: Vec<i64>,
    pub admin_user_ids: Vec<i64>,
    pub media_group_window_ms: u64,
    pub media_group_retention_seconds: u64,
    pub telegram_request_timeout_seconds: u64,
    pub menu_banner_url: Option<String>,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_id_list(raw: &str) -> Vec<i64> {
    raw.split(',')
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .filter_map(|value| match value.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("Ignoring invalid user id '{}' in id list", value);
                None
            }
        })
        .collect()
}

fn env_id_list(name: &str) -> Vec<i64> {
    env::var(name)
        .map(|value| parse_id_list(&value))
        .unwrap_or_default()
}

impl Config {
    pub fn load() -> Result<Self> {
        let bot_token = env::var("BOT_TOKEN").unwrap_or_default();
        if bot_token.trim().is_empty() {
            return Err(anyhow::anyhow!("BOT_TOKEN is required"));
        }

        let generation_cost = env_i64("GENERATION_COST", 1);
        if generation_cost < 0 {
            return Err(anyhow::anyhow!("GENERATION_COST must not be negative"));
        }

        Ok(Config {
            bot_token,
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            database_url: env_string("DATABASE_URL", "sqlite://bot.db?mode=rwc"),
            generation_endpoint: env_string("GENERATION_ENDPOINT", ""),
            generation_api_key: env_string("GENERATION_API_KEY", ""),
            generation_timeout_seconds: env_u64("GENERATION_TIMEOUT_SECONDS", 180),
            generation_cost,
            starting_credits: env_i64("STARTING_CREDITS", 3).max(0),
            exempt_user_ids: env_id_list("EXEMPT_USER_IDS"),
            admin_user_ids: env_id_list("ADMIN_USER_IDS"),
            media_group_window_ms: env_u64("MEDIA_GROUP_WINDOW_MS", 1000),
            media_group_retention_seconds: env_u64("MEDIA_GROUP_RETENTION_SECONDS", 30),
            telegram_request_timeout_seconds: env_u64("TELEGRAM_REQUEST_TIMEOUT_SECONDS", 20),
            menu_banner_url: env_optional("MENU_BANNER_URL"),
        })
    }

    pub fn media_group_window(&self) -> Duration {
        Duration::from_millis(self.media_group_window_ms)
    }

    pub fn media_group_retention(&self) -> Duration {
        Duration::from_secs(self.media_group_retention_seconds)
    }

    pub fn telegram_request_timeout(&self) -> Duration {
        Duration::from_secs(self.telegram_request_timeout_seconds.max(1))
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_seconds.max(1))
    }
}

//! Service configuration loaded from environment variables.
//!
//! SYSTEM CONTEXT
//! ==============
//! `main` builds one `AppConfig` at startup (after `dotenvy` has loaded an
//! optional `.env`) and hands the pieces to the pool, the router, and the
//! automation worker. Only `DATABASE_URL` is required.

use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_SESSION_TTL_HOURS: i64 = 720;
const DEFAULT_AUTOMATION_TICK_SECS: u64 = 30;
const DEFAULT_CURRENCY: &str = "EUR";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
}

/// Outbound email settings. Absent means codes are logged instead of sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailConfig {
    pub resend_api_key: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    pub session_ttl_hours: i64,
    pub cookie_secure: bool,
    pub mail: Option<MailConfig>,
    pub automation_tick: Duration,
    pub default_currency: String,
    /// Return login codes in the API response. Local development only.
    pub expose_login_codes: bool,
}

impl AppConfig {
    /// Read the full service configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when `DATABASE_URL` is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let mail = match (std::env::var("RESEND_API_KEY"), std::env::var("RESEND_FROM")) {
            (Ok(resend_api_key), Ok(from)) if !resend_api_key.trim().is_empty() => {
                Some(MailConfig { resend_api_key, from })
            }
            _ => None,
        };

        Ok(Self {
            database_url,
            port: env_parse("PORT", DEFAULT_PORT),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            session_ttl_hours: env_parse("SESSION_TTL_HOURS", DEFAULT_SESSION_TTL_HOURS).max(1),
            cookie_secure: cookie_secure(),
            mail,
            automation_tick: Duration::from_secs(env_parse("AUTOMATION_TICK_SECS", DEFAULT_AUTOMATION_TICK_SECS).max(1)),
            default_currency: normalize_currency(
                &std::env::var("DEFAULT_CURRENCY").unwrap_or_else(|_| DEFAULT_CURRENCY.to_owned()),
            )
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_owned()),
            expose_login_codes: env_bool("DEV_EXPOSE_LOGIN_CODES").unwrap_or(false),
        })
    }
}

/// Parse an env var, falling back to `default` when unset or malformed.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

pub fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

/// `COOKIE_SECURE` wins; otherwise infer from an https `PUBLIC_URL`.
pub fn cookie_secure() -> bool {
    if let Some(value) = env_bool("COOKIE_SECURE") {
        return value;
    }

    std::env::var("PUBLIC_URL")
        .map(|url| url.starts_with("https://"))
        .unwrap_or(false)
}

/// Three-letter uppercase ISO-style currency code.
#[must_use]
pub fn normalize_currency(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()) {
        Some(code)
    } else {
        None
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

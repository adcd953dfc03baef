use std::path::PathBuf;
use std::time::Duration;

use crate::models::Id;
use crate::rate_limit::RateLimitConfig;

pub const MIN_SECRET_LEN: usize = 32;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("JWT_SECRET must be at least {MIN_SECRET_LEN} characters long")]
    WeakSecret,
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub frontend_url: Option<String>,
    pub database_url: Option<String>,
    pub data_dir: PathBuf,
    pub enable_hsts: bool,
    pub metrics_enabled: bool,
    pub log_level: String,
    pub rate_limits: RateLimitConfig,
    pub bootstrap_admin_ids: Vec<Id>,
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid { name, value: raw.to_string() }),
    }
}

fn parse_num<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value: raw.to_string() })
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret);
        }

        let flag = |name: &'static str, default: bool| -> Result<bool, ConfigError> {
            get(name).map_or(Ok(default), |v| parse_bool(name, &v))
        };
        let count = |name: &'static str, default: usize| -> Result<usize, ConfigError> {
            get(name).map_or(Ok(default), |v| parse_num(name, &v))
        };
        let secs = |name: &'static str, default: u64| -> Result<Duration, ConfigError> {
            get(name).map_or(Ok(default), |v| parse_num(name, &v)).map(Duration::from_secs)
        };

        let defaults = RateLimitConfig::default();
        let rate_limits = RateLimitConfig {
            listing_limit: count("RL_LISTING_LIMIT", defaults.listing_limit)?,
            listing_window: secs("RL_LISTING_WINDOW", defaults.listing_window.as_secs())?,
            message_limit: count("RL_MESSAGE_LIMIT", defaults.message_limit)?,
            message_window: secs("RL_MESSAGE_WINDOW", defaults.message_window.as_secs())?,
            conversation_limit: count("RL_CONVERSATION_LIMIT", defaults.conversation_limit)?,
            conversation_window: secs("RL_CONVERSATION_WINDOW", defaults.conversation_window.as_secs())?,
        };

        let bootstrap_admin_ids: Vec<Id> = match get("BOOTSTRAP_ADMIN_IDS") {
            None => Vec::new(),
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_num::<Id>("BOOTSTRAP_ADMIN_IDS", s))
                .collect::<Result<_, _>>()?,
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            frontend_url: get("FRONTEND_URL").filter(|v| !v.trim().is_empty()),
            database_url: get("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            data_dir: get("BAZAAR_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data")),
            enable_hsts: flag("ENABLE_HSTS", false)?,
            metrics_enabled: flag("METRICS_ENABLED", true)?,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            rate_limits,
            bootstrap_admin_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn defaults_apply() {
        let cfg = AppConfig::from_lookup(lookup(&[("JWT_SECRET", SECRET)])).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert!(cfg.metrics_enabled);
        assert!(!cfg.enable_hsts);
        assert_eq!(cfg.rate_limits.listing_limit, 5);
        assert_eq!(cfg.rate_limits.listing_window, Duration::from_secs(3600));
        assert!(cfg.bootstrap_admin_ids.is_empty());
    }

    #[test]
    fn secret_is_required_and_long() {
        assert_eq!(AppConfig::from_lookup(lookup(&[])).unwrap_err(), ConfigError::Missing("JWT_SECRET"));
        assert_eq!(
            AppConfig::from_lookup(lookup(&[("JWT_SECRET", "short")])).unwrap_err(),
            ConfigError::WeakSecret
        );
    }

    #[test]
    fn parses_overrides() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", SECRET),
            ("ENABLE_HSTS", "true"),
            ("RL_MESSAGE_LIMIT", "3"),
            ("BOOTSTRAP_ADMIN_IDS", "1, 42"),
        ]))
        .unwrap();
        assert!(cfg.enable_hsts);
        assert_eq!(cfg.rate_limits.message_limit, 3);
        assert_eq!(cfg.bootstrap_admin_ids, vec![1, 42]);
    }

    #[test]
    fn rejects_garbage() {
        let err = AppConfig::from_lookup(lookup(&[("JWT_SECRET", SECRET), ("RL_LISTING_WINDOW", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "RL_LISTING_WINDOW", .. }));
    }
}

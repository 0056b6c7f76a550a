//! Environment-backed configuration for `storefront-smoke`.

use std::{env, str::FromStr, time::Duration};

use storefront_core::EngineConfig;
use storefront_net::{DEFAULT_SERVER_ADDRESS, RuntimeConfig};
use thiserror::Error;

const UNDO_WINDOW_RANGE_MS: std::ops::RangeInclusive<u64> = 3_000..=5_000;

/// Runtime configuration used by the smoke driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    pub runtime: RuntimeConfig,
    /// Stop after this long; `None` runs until Ctrl-C.
    pub run_for: Option<Duration>,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let defaults = EngineConfig::default();
        let server_address = optional_trimmed_env("STOREFRONT_SERVER", &mut lookup)
            .unwrap_or_else(|| DEFAULT_SERVER_ADDRESS.to_owned());
        let username = optional_trimmed_env("STOREFRONT_USER", &mut lookup);

        let page_size = parse_or("STOREFRONT_PAGE_SIZE", defaults.page_size, &mut lookup)?;
        if page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "STOREFRONT_PAGE_SIZE",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        let chat_history_limit = parse_or(
            "STOREFRONT_CHAT_HISTORY_LIMIT",
            defaults.chat_history_limit,
            &mut lookup,
        )?;
        let checkout_timeout_ms = parse_or(
            "STOREFRONT_CHECKOUT_TIMEOUT_MS",
            defaults.checkout_timeout_ms,
            &mut lookup,
        )?;
        if checkout_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "STOREFRONT_CHECKOUT_TIMEOUT_MS",
                value: "0".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        let reply_timeout_ms = parse_or(
            "STOREFRONT_REPLY_TIMEOUT_MS",
            defaults.reply_timeout_ms,
            &mut lookup,
        )?;
        let undo_window_ms =
            parse_or("STOREFRONT_UNDO_WINDOW_MS", defaults.undo_window_ms, &mut lookup)?;
        if !UNDO_WINDOW_RANGE_MS.contains(&undo_window_ms) {
            return Err(ConfigError::InvalidValue {
                key: "STOREFRONT_UNDO_WINDOW_MS",
                value: undo_window_ms.to_string(),
                reason: "must be between 3000 and 5000".to_owned(),
            });
        }
        let legacy_checkout = parse_bool("STOREFRONT_LEGACY_CHECKOUT", &mut lookup)?
            .unwrap_or(defaults.legacy_checkout);
        let run_for = parse_optional::<u64, _>("STOREFRONT_SMOKE_DURATION_SECS", &mut lookup)?
            .map(Duration::from_secs);

        Ok(Self {
            runtime: RuntimeConfig {
                server_address,
                engine: EngineConfig {
                    username,
                    page_size,
                    chat_history_limit,
                    checkout_timeout_ms,
                    reply_timeout_ms,
                    undo_window_ms,
                    legacy_checkout,
                    ..defaults
                },
            },
            run_for,
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional<T, F>(key: &'static str, lookup: &mut F) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<T>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_or<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    Ok(parse_optional(key, lookup)?.unwrap_or(default))
}

fn parse_bool<F>(key: &'static str, lookup: &mut F) -> Result<Option<bool>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected a boolean".to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<SmokeConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        SmokeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = config_from_pairs(&[]).expect("config should parse");
        assert_eq!(cfg.runtime.server_address, DEFAULT_SERVER_ADDRESS);
        assert_eq!(cfg.runtime.engine, EngineConfig::default());
        assert_eq!(cfg.run_for, None);
    }

    #[test]
    fn parses_identity_and_tuning() {
        let cfg = config_from_pairs(&[
            ("STOREFRONT_SERVER", " shop.example.org:9000 "),
            ("STOREFRONT_USER", "alice"),
            ("STOREFRONT_PAGE_SIZE", "24"),
            ("STOREFRONT_CHAT_HISTORY_LIMIT", "100"),
            ("STOREFRONT_CHECKOUT_TIMEOUT_MS", "5000"),
            ("STOREFRONT_REPLY_TIMEOUT_MS", "8000"),
            ("STOREFRONT_UNDO_WINDOW_MS", "4000"),
            ("STOREFRONT_LEGACY_CHECKOUT", "yes"),
            ("STOREFRONT_SMOKE_DURATION_SECS", "30"),
        ])
        .expect("config should parse");

        assert_eq!(cfg.runtime.server_address, "shop.example.org:9000");
        let engine = &cfg.runtime.engine;
        assert_eq!(engine.username.as_deref(), Some("alice"));
        assert_eq!(engine.page_size, 24);
        assert_eq!(engine.chat_history_limit, 100);
        assert_eq!(engine.checkout_timeout_ms, 5_000);
        assert_eq!(engine.reply_timeout_ms, 8_000);
        assert_eq!(engine.undo_window_ms, 4_000);
        assert!(engine.legacy_checkout);
        assert_eq!(cfg.run_for, Some(Duration::from_secs(30)));
    }

    #[test]
    fn rejects_zero_page_size() {
        let err = config_from_pairs(&[("STOREFRONT_PAGE_SIZE", "0")])
            .expect_err("zero page size must fail");
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "STOREFRONT_PAGE_SIZE",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            }
        );
    }

    #[test]
    fn rejects_undo_window_outside_range() {
        let err = config_from_pairs(&[("STOREFRONT_UNDO_WINDOW_MS", "9000")])
            .expect_err("undo window must be bounded");
        assert!(err.to_string().contains("STOREFRONT_UNDO_WINDOW_MS"));
    }

    #[test]
    fn rejects_garbage_numbers_and_booleans() {
        assert!(config_from_pairs(&[("STOREFRONT_CHECKOUT_TIMEOUT_MS", "soon")]).is_err());
        assert!(config_from_pairs(&[("STOREFRONT_LEGACY_CHECKOUT", "maybe")]).is_err());
    }
}

//! Environment-driven configuration.
//!
//! Missing credentials are not an error here: the clients report
//! `Configuration` errors when invoked. Malformed numbers are.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use leadflow_ai::GeminiConfig;
use leadflow_outbound::RetryPolicy;
use leadflow_outbound::backoff::{DEFAULT_BACKOFF_CAP_SECS, DEFAULT_MAX_ATTEMPTS};
use leadflow_outbound::worker::DEFAULT_EMPTY_TICK_THRESHOLD;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_RESEND_BASE_URL: &str = "https://api.resend.com";
pub const DEFAULT_APP_URL: &str = "http://localhost:8080";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("{key} is required")]
    Missing { key: &'static str },
}

/// Worker tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundConfig {
    /// Delay between a successful initial send and its follow-up.
    pub followup_delay: Duration,
    /// Minimum spacing between two sends of the same owner.
    pub rate_limit: Duration,
    pub max_jobs_per_tick: usize,
    pub retry: RetryPolicy,
    pub empty_tick_threshold: u32,
    /// Age after which a job lease is considered abandoned.
    pub lease_timeout: Duration,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            followup_delay: Duration::from_secs(120),
            rate_limit: Duration::from_secs(60),
            max_jobs_per_tick: 10,
            retry: RetryPolicy::default(),
            empty_tick_threshold: DEFAULT_EMPTY_TICK_THRESHOLD,
            lease_timeout: Duration::from_secs(900),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    pub api_key: Option<String>,
    pub from: Option<String>,
    /// Defaults to `from` when unset.
    pub reply_to: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            from: None,
            reply_to: None,
            base_url: DEFAULT_RESEND_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Everything the HTTP service needs at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// `None` runs on the in-memory store.
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub cron_secret: Option<String>,
    pub webhook_secret: Option<String>,
    pub outbound: OutboundConfig,
    pub delivery: DeliveryConfig,
    pub gemini: GeminiConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = OutboundConfig::default();

        let max_attempts = env.parsed("MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        let backoff_cap = env.parsed("BACKOFF_CAP_SECS", DEFAULT_BACKOFF_CAP_SECS)?;

        let outbound = OutboundConfig {
            followup_delay: env.secs("FOLLOWUP_DELAY_SECS", defaults.followup_delay)?,
            rate_limit: env.secs("RATE_LIMIT_SECS", defaults.rate_limit)?,
            max_jobs_per_tick: env.parsed("MAX_JOBS_PER_TICK", defaults.max_jobs_per_tick)?,
            retry: RetryPolicy::new(max_attempts, Duration::from_secs(backoff_cap)),
            empty_tick_threshold: env.parsed("EMPTY_TICK_THRESHOLD", defaults.empty_tick_threshold)?,
            lease_timeout: env.secs("LEASE_TIMEOUT_SECS", defaults.lease_timeout)?,
        };

        let from = env.string("EMAIL_FROM");
        let delivery = DeliveryConfig {
            api_key: env.string("RESEND_API_KEY"),
            reply_to: env.string("EMAIL_REPLY_TO").or_else(|| from.clone()),
            from,
            base_url: env
                .string("RESEND_BASE_URL")
                .unwrap_or_else(|| DEFAULT_RESEND_BASE_URL.to_string()),
            ..DeliveryConfig::default()
        };

        let gemini_defaults = GeminiConfig::default();
        let gemini = GeminiConfig {
            api_key: env.string("GEMINI_API_KEY"),
            model: env.string("GEMINI_MODEL").unwrap_or(gemini_defaults.model),
            timeout: env.secs("GEMINI_TIMEOUT_SECS", gemini_defaults.timeout)?,
            base_url: gemini_defaults.base_url,
        };

        Ok(Self {
            database_url: env.string("DATABASE_URL"),
            bind_addr: env
                .string("BIND_ADDR")
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            cron_secret: env.string("CRON_SECRET"),
            webhook_secret: env.string("RESEND_WEBHOOK_SECRET"),
            outbound,
            delivery,
            gemini,
        })
    }
}

/// Settings for the standalone tick poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    pub tick_url: String,
    /// Never shorter than one second.
    pub interval: Duration,
    pub cron_secret: String,
}

impl PollerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let cron_secret = env
            .string("CRON_SECRET")
            .ok_or(ConfigError::Missing { key: "CRON_SECRET" })?;
        let app_url = env
            .string("APP_URL")
            .unwrap_or_else(|| DEFAULT_APP_URL.to_string());
        let interval = env.secs("POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL)?;

        Ok(Self {
            tick_url: format!("{}/worker/outbound/tick", app_url.trim_end_matches('/')),
            interval: interval.max(Duration::from_secs(1)),
            cron_secret,
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value; empty counts as unset.
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.string(key) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value }),
        }
    }

    fn secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parsed(key, default.as_secs()).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.database_url, None);
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.outbound, OutboundConfig::default());
        assert_eq!(config.outbound.retry.max_attempts, 3);
        assert_eq!(config.gemini.model, "gemini-2.5-flash");
        assert_eq!(config.delivery.base_url, DEFAULT_RESEND_BASE_URL);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("FOLLOWUP_DELAY_SECS", "172800"),
            ("MAX_ATTEMPTS", "5"),
            ("BACKOFF_CAP_SECS", "600"),
            ("CRON_SECRET", " s3cret "),
            ("EMAIL_FROM", "Outreach <hi@example.com>"),
        ])
        .unwrap();

        assert_eq!(config.outbound.followup_delay, Duration::from_secs(172_800));
        assert_eq!(config.outbound.retry.max_attempts, 5);
        assert_eq!(config.outbound.retry.max_delay, Duration::from_secs(600));
        assert_eq!(config.cron_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.delivery.reply_to, config.delivery.from);
    }

    #[test]
    fn malformed_number_is_rejected() {
        let err = config_from(&[("MAX_JOBS_PER_TICK", "ten")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "MAX_JOBS_PER_TICK",
                value: "ten".into()
            }
        );
    }

    fn poller_from(pairs: &[(&str, &str)]) -> Result<PollerConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PollerConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn poller_defaults_need_only_the_secret() {
        let config = poller_from(&[("CRON_SECRET", "s3cret")]).unwrap();

        assert_eq!(config.tick_url, "http://localhost:8080/worker/outbound/tick");
        assert_eq!(config.interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.cron_secret, "s3cret");
    }

    #[test]
    fn poller_requires_a_cron_secret() {
        assert_eq!(poller_from(&[]).unwrap_err(), ConfigError::Missing { key: "CRON_SECRET" });
        assert_eq!(
            poller_from(&[("CRON_SECRET", "   ")]).unwrap_err(),
            ConfigError::Missing { key: "CRON_SECRET" }
        );
    }

    #[test]
    fn poller_overrides_are_trimmed_and_clamped() {
        let config = poller_from(&[
            ("CRON_SECRET", " s3cret\n"),
            ("APP_URL", " https://leads.example.com/ "),
            ("POLL_INTERVAL_SECS", "0"),
        ])
        .unwrap();

        assert_eq!(config.tick_url, "https://leads.example.com/worker/outbound/tick");
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.cron_secret, "s3cret");

        let empty_url = poller_from(&[("CRON_SECRET", "x"), ("APP_URL", "")]).unwrap();
        assert_eq!(empty_url.tick_url, "http://localhost:8080/worker/outbound/tick");
    }

    #[test]
    fn poller_rejects_malformed_interval() {
        let err = poller_from(&[("CRON_SECRET", "x"), ("POLL_INTERVAL_SECS", "1m")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "POLL_INTERVAL_SECS",
                value: "1m".into()
            }
        );
    }

    #[test]
    fn empty_values_count_as_unset() {
        let config = config_from(&[("CRON_SECRET", ""), ("DATABASE_URL", "  ")]).unwrap();
        assert_eq!(config.cron_secret, None);
        assert_eq!(config.database_url, None);
    }
}

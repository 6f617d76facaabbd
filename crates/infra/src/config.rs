//! Engine configuration with `BOXPRICE_*` environment overrides.

use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use boxprice_pricing::{AlertRules, StrategyDefaults};

use crate::retry::RetryPolicy;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub competitor_window_days: i64,
    pub min_competitor_sample: usize,
    pub gateway_timeout_ms: u64,
    pub gateway_retry_backoff_ms: u64,
    /// Base URL of the competitor rate service; `None` disables the HTTP gateway.
    pub competitor_gateway_url: Option<String>,
    pub cycle_hours: i64,
    pub ml_min_confidence: f64,
    pub competitor_nudge: f64,
    pub large_change_pct: f64,
    pub max_parallel_sites: usize,
    /// Scheduled cycles apply changed prices instead of queueing them for review.
    pub auto_apply: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            competitor_window_days: 30,
            min_competitor_sample: 3,
            gateway_timeout_ms: 10_000,
            gateway_retry_backoff_ms: 250,
            competitor_gateway_url: None,
            cycle_hours: 24,
            ml_min_confidence: 0.70,
            competitor_nudge: 0.25,
            large_change_pct: 15.0,
            max_parallel_sites: 4,
            auto_apply: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `BOXPRICE_*` key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(v) = lookup("BOXPRICE_COMPETITOR_WINDOW_DAYS") {
            cfg.competitor_window_days = parse("BOXPRICE_COMPETITOR_WINDOW_DAYS", &v)?;
        }
        if let Some(v) = lookup("BOXPRICE_MIN_COMPETITOR_SAMPLE") {
            cfg.min_competitor_sample = parse("BOXPRICE_MIN_COMPETITOR_SAMPLE", &v)?;
        }
        if let Some(v) = lookup("BOXPRICE_GATEWAY_TIMEOUT_MS") {
            cfg.gateway_timeout_ms = parse("BOXPRICE_GATEWAY_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("BOXPRICE_GATEWAY_RETRY_BACKOFF_MS") {
            cfg.gateway_retry_backoff_ms = parse("BOXPRICE_GATEWAY_RETRY_BACKOFF_MS", &v)?;
        }
        if let Some(v) = lookup("BOXPRICE_COMPETITOR_GATEWAY_URL") {
            let v = v.trim();
            cfg.competitor_gateway_url = (!v.is_empty()).then(|| v.to_string());
        }
        if let Some(v) = lookup("BOXPRICE_CYCLE_HOURS") {
            cfg.cycle_hours = parse("BOXPRICE_CYCLE_HOURS", &v)?;
        }
        if let Some(v) = lookup("BOXPRICE_ML_MIN_CONFIDENCE") {
            cfg.ml_min_confidence = parse("BOXPRICE_ML_MIN_CONFIDENCE", &v)?;
        }
        if let Some(v) = lookup("BOXPRICE_COMPETITOR_NUDGE") {
            cfg.competitor_nudge = parse("BOXPRICE_COMPETITOR_NUDGE", &v)?;
        }
        if let Some(v) = lookup("BOXPRICE_LARGE_CHANGE_PCT") {
            cfg.large_change_pct = parse("BOXPRICE_LARGE_CHANGE_PCT", &v)?;
        }
        if let Some(v) = lookup("BOXPRICE_MAX_PARALLEL_SITES") {
            cfg.max_parallel_sites = parse("BOXPRICE_MAX_PARALLEL_SITES", &v)?;
        }
        if let Some(v) = lookup("BOXPRICE_AUTO_APPLY") {
            cfg.auto_apply = parse("BOXPRICE_AUTO_APPLY", &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check(
            "BOXPRICE_COMPETITOR_WINDOW_DAYS",
            self.competitor_window_days,
            self.competitor_window_days > 0,
            "must be positive",
        )?;
        check(
            "BOXPRICE_MIN_COMPETITOR_SAMPLE",
            self.min_competitor_sample,
            self.min_competitor_sample >= 1,
            "must be at least 1",
        )?;
        check(
            "BOXPRICE_GATEWAY_TIMEOUT_MS",
            self.gateway_timeout_ms,
            self.gateway_timeout_ms > 0,
            "must be positive",
        )?;
        check(
            "BOXPRICE_CYCLE_HOURS",
            self.cycle_hours,
            self.cycle_hours > 0,
            "must be positive",
        )?;
        check(
            "BOXPRICE_ML_MIN_CONFIDENCE",
            self.ml_min_confidence,
            (0.0..=1.0).contains(&self.ml_min_confidence),
            "must be within [0, 1]",
        )?;
        check(
            "BOXPRICE_COMPETITOR_NUDGE",
            self.competitor_nudge,
            (0.0..=1.0).contains(&self.competitor_nudge),
            "must be within [0, 1]",
        )?;
        check(
            "BOXPRICE_LARGE_CHANGE_PCT",
            self.large_change_pct,
            self.large_change_pct.is_finite() && self.large_change_pct > 0.0,
            "must be positive",
        )?;
        check(
            "BOXPRICE_MAX_PARALLEL_SITES",
            self.max_parallel_sites,
            self.max_parallel_sites >= 1,
            "must be at least 1",
        )
    }

    pub fn cycle(&self) -> Duration {
        Duration::hours(self.cycle_hours)
    }

    pub fn competitor_window(&self) -> Duration {
        Duration::days(self.competitor_window_days)
    }

    pub fn gateway_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.gateway_timeout_ms)
    }

    /// One retry after the configured backoff.
    pub fn gateway_retry(&self) -> RetryPolicy {
        RetryPolicy::once(StdDuration::from_millis(self.gateway_retry_backoff_ms))
    }

    pub fn strategy_defaults(&self) -> StrategyDefaults {
        StrategyDefaults {
            ml_min_confidence: self.ml_min_confidence,
            competitor_nudge: self.competitor_nudge,
        }
    }

    pub fn alert_rules(&self) -> AlertRules {
        AlertRules {
            large_change_pct: self.large_change_pct,
            ..AlertRules::default()
        }
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn check(
    key: &'static str,
    value: impl std::fmt::Display,
    ok: bool,
    reason: &str,
) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: reason.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.cycle(), Duration::hours(24));
        assert_eq!(cfg.competitor_window(), Duration::days(30));
        assert_eq!(cfg.gateway_timeout(), StdDuration::from_secs(10));
        assert_eq!(cfg.gateway_retry().max_retries, 1);
        assert_eq!(cfg.strategy_defaults(), StrategyDefaults::default());
    }

    #[test]
    fn env_overrides_apply() {
        let cfg = EngineConfig::from_lookup(lookup(&[
            ("BOXPRICE_MIN_COMPETITOR_SAMPLE", "5"),
            ("BOXPRICE_CYCLE_HOURS", " 12 "),
            ("BOXPRICE_COMPETITOR_GATEWAY_URL", "http://rates.local"),
            ("BOXPRICE_LARGE_CHANGE_PCT", "20"),
            ("BOXPRICE_AUTO_APPLY", "true"),
        ]))
        .unwrap();
        assert_eq!(cfg.min_competitor_sample, 5);
        assert_eq!(cfg.cycle_hours, 12);
        assert_eq!(cfg.competitor_gateway_url.as_deref(), Some("http://rates.local"));
        assert_eq!(cfg.alert_rules().large_change_pct, 20.0);
        assert!(cfg.auto_apply);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[("BOXPRICE_CYCLE_HOURS", "daily")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "BOXPRICE_CYCLE_HOURS", .. }));

        let err =
            EngineConfig::from_lookup(lookup(&[("BOXPRICE_ML_MIN_CONFIDENCE", "1.5")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "BOXPRICE_ML_MIN_CONFIDENCE", .. }));
    }
}

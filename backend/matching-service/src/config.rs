//! Configuration management for matching-service
//!
//! Loads configuration from environment variables (after `.env`, if any).

use crate::repository::QuotaLimits;
use crate::services::{DiscoveryPolicy, DiscoveryTier, GiftPolicy, PolicyLadder};
use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub discovery: DiscoveryConfig,
    pub gifts: GiftsConfig,
    pub quota: QuotaConfig,
    pub events: EventsConfig,
    pub internal: InternalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (development, staging, production)
    pub env: String,
    pub host: String,
    pub http_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Per-statement budget inside ledger and quota transactions
    pub statement_timeout_ms: u64,
}

/// Redis is optional; without it exposure counters stay in process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub result_limit: usize,
    pub exposure_cap: u32,
    pub session_horizon_secs: i64,
    pub strict_radius_m: f64,
    pub strict_age_delta: u32,
    pub strict_recency_days: u32,
    pub relaxed_radius_m: f64,
    pub relaxed_age_delta: u32,
    pub wide_radius_m: f64,
    pub wide_age_delta: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiftsConfig {
    /// `None`: sparks stay active until withdrawn
    pub spark_ttl_days: Option<u32>,
    pub echo_ttl_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub weekly_limit: u32,
    pub monthly_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

/// Service-to-service calls (stock replenishment)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalConfig {
    /// Shared secret expected in `x-internal-api-key`; `None` refuses every
    /// internal call
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let strict = DiscoveryPolicy::strict();
        let relaxed = DiscoveryPolicy::relaxed();
        let wide = DiscoveryPolicy::wide();
        Self {
            result_limit: strict.limit,
            exposure_cap: 2,
            session_horizon_secs: 6 * 3600,
            strict_radius_m: strict.radius_m,
            strict_age_delta: strict.age_delta,
            strict_recency_days: strict.recency_days.unwrap_or(14),
            relaxed_radius_m: relaxed.radius_m,
            relaxed_age_delta: relaxed.age_delta,
            wide_radius_m: wide.radius_m,
            wide_age_delta: wide.age_delta,
        }
    }
}

impl DiscoveryConfig {
    /// Build the strict → relaxed → wide ladder, rejecting non-monotonic values
    pub fn ladder(&self) -> Result<PolicyLadder> {
        let tier = |tier, radius_m, age_delta, recency_days| DiscoveryPolicy {
            tier,
            radius_m,
            age_delta,
            recency_days,
            limit: self.result_limit,
        };

        PolicyLadder::new(vec![
            tier(
                DiscoveryTier::Strict,
                self.strict_radius_m,
                self.strict_age_delta,
                Some(self.strict_recency_days),
            ),
            tier(
                DiscoveryTier::Relaxed,
                self.relaxed_radius_m,
                self.relaxed_age_delta,
                None,
            ),
            tier(DiscoveryTier::Wide, self.wide_radius_m, self.wide_age_delta, None),
        ])
        .map_err(|e| anyhow!(e))
        .context("Invalid discovery tier configuration")
    }
}

impl GiftsConfig {
    pub fn policy(&self) -> GiftPolicy {
        GiftPolicy {
            spark_ttl: self.spark_ttl_days.map(|d| Duration::days(i64::from(d))),
            echo_ttl: self.echo_ttl_days.map(|d| Duration::days(i64::from(d))),
        }
    }
}

impl QuotaConfig {
    pub fn limits(&self) -> QuotaLimits {
        QuotaLimits {
            weekly: self.weekly_limit,
            monthly: self.monthly_limit,
        }
    }
}

/// Parse an optional variable; a present but malformed value is an error
fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

/// Upper bound for every days-valued setting; keeps timestamp arithmetic
/// in range
const MAX_DAYS: u32 = 3650;

fn env_days(key: &str, default: u32) -> Result<u32> {
    let days = env_parse(key, default)?;
    if days > MAX_DAYS {
        return Err(anyhow!("{} must be at most {} days, got {}", key, MAX_DAYS, days));
    }
    Ok(days)
}

/// Days-valued TTL where `0` disables expiry
fn env_ttl_days(key: &str, default: Option<u32>) -> Result<Option<u32>> {
    let days = env_days(key, default.unwrap_or(0))?;
    Ok((days > 0).then_some(days))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: env_parse("PORT", 8016)?,
        };

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL environment variable not set")?,
            max_connections: env_parse("DB_MAX_CONNECTIONS", 20)?,
            min_connections: env_parse("DB_MIN_CONNECTIONS", 5)?,
            statement_timeout_ms: env_parse("DB_STATEMENT_TIMEOUT_MS", 2000)?,
        };
        if database.min_connections > database.max_connections {
            return Err(anyhow!(
                "DB_MIN_CONNECTIONS ({}) exceeds DB_MAX_CONNECTIONS ({})",
                database.min_connections,
                database.max_connections
            ));
        }

        let redis = RedisConfig {
            url: std::env::var("REDIS_URL").ok().filter(|u| !u.trim().is_empty()),
        };

        let defaults = DiscoveryConfig::default();
        let discovery = DiscoveryConfig {
            result_limit: env_parse("DISCOVERY_RESULT_LIMIT", defaults.result_limit)?,
            exposure_cap: env_parse("DISCOVERY_EXPOSURE_CAP", defaults.exposure_cap)?,
            session_horizon_secs: env_parse(
                "DISCOVERY_SESSION_HORIZON_SECS",
                defaults.session_horizon_secs,
            )?,
            strict_radius_m: env_parse("DISCOVERY_STRICT_RADIUS_M", defaults.strict_radius_m)?,
            strict_age_delta: env_parse("DISCOVERY_STRICT_AGE_DELTA", defaults.strict_age_delta)?,
            strict_recency_days: env_days(
                "DISCOVERY_STRICT_RECENCY_DAYS",
                defaults.strict_recency_days,
            )?,
            relaxed_radius_m: env_parse("DISCOVERY_RELAXED_RADIUS_M", defaults.relaxed_radius_m)?,
            relaxed_age_delta: env_parse(
                "DISCOVERY_RELAXED_AGE_DELTA",
                defaults.relaxed_age_delta,
            )?,
            wide_radius_m: env_parse("DISCOVERY_WIDE_RADIUS_M", defaults.wide_radius_m)?,
            wide_age_delta: env_parse("DISCOVERY_WIDE_AGE_DELTA", defaults.wide_age_delta)?,
        };
        discovery.ladder()?;

        let gifts = GiftsConfig {
            spark_ttl_days: env_ttl_days("SPARK_TTL_DAYS", None)?,
            echo_ttl_days: env_ttl_days("ECHO_TTL_DAYS", Some(7))?,
        };

        let quota = QuotaConfig {
            weekly_limit: env_parse("QUOTA_WEEKLY_LIMIT", 3)?,
            monthly_limit: env_parse("QUOTA_MONTHLY_LIMIT", 10)?,
        };

        let events = EventsConfig {
            channel_capacity: env_parse("EVENT_CHANNEL_CAPACITY", 1024)?,
        };

        let internal = InternalConfig {
            api_key: std::env::var("INTERNAL_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
        };

        Ok(Config {
            app,
            database,
            redis,
            discovery,
            gifts,
            quota,
            events,
            internal,
        })
    }

    pub fn is_production(&self) -> bool {
        self.app.env == "production"
    }
}

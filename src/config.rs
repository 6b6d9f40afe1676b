//! Environment-driven application configuration.

use std::time::Duration;

/// Deployment environment, controls CORS policy and production validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        match std::env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Environment::Production,
            "staging" | "stage" => Environment::Staging,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or_default("SERVER_HOST", "0.0.0.0"),
            port: env_or_default("SERVER_PORT", "8080")
                .parse()
                .unwrap_or(8080),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DatabaseSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            url: require_env("DATABASE_URL")?,
            max_connections: env_or_default("DATABASE_MAX_CONNECTIONS", "20").parse()?,
            acquire_timeout: Duration::from_secs(
                env_or_default("DATABASE_ACQUIRE_TIMEOUT_SECONDS", "30").parse()?,
            ),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub url: String,
    pub pool_size: usize,
}

impl RedisSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            url: require_env("REDIS_URL")?,
            pool_size: env_or_default("REDIS_POOL_SIZE", "16").parse()?,
        })
    }
}

/// Sliding-window rate limiter knobs (per user).
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub limit: u32,
    pub window: Duration,
    pub throttle_medium_ratio: f64,
    pub throttle_medium_delay: Duration,
    pub throttle_high_ratio: f64,
    pub throttle_high_delay: Duration,
    pub min_deadline: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            limit: 5,
            window: Duration::from_secs(60),
            throttle_medium_ratio: 0.5,
            throttle_medium_delay: Duration::from_secs(1),
            throttle_high_ratio: 0.75,
            throttle_high_delay: Duration::from_secs(2),
            min_deadline: Duration::from_secs(5),
        }
    }
}

impl RateLimitSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            limit: env_or_default("RATE_LIMIT_LIMIT", &defaults.limit.to_string()).parse()?,
            window: Duration::from_secs(
                env_or_default("RATE_LIMIT_WINDOW_SECONDS", &defaults.window.as_secs().to_string())
                    .parse()?,
            ),
            throttle_medium_ratio: env_or_default(
                "RATE_LIMIT_THROTTLE_MEDIUM_RATIO",
                &defaults.throttle_medium_ratio.to_string(),
            )
            .parse()?,
            throttle_medium_delay: Duration::from_millis(
                env_or_default("RATE_LIMIT_THROTTLE_MEDIUM_DELAY_MS", "1000").parse()?,
            ),
            throttle_high_ratio: env_or_default(
                "RATE_LIMIT_THROTTLE_HIGH_RATIO",
                &defaults.throttle_high_ratio.to_string(),
            )
            .parse()?,
            throttle_high_delay: Duration::from_millis(
                env_or_default("RATE_LIMIT_THROTTLE_HIGH_DELAY_MS", "2000").parse()?,
            ),
            min_deadline: Duration::from_millis(
                env_or_default("RATE_LIMIT_MIN_DEADLINE_MS", "5000").parse()?,
            ),
        })
    }
}

/// Bulk ingestion pipeline knobs.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub channel_capacity: usize,
    pub primary_flush_threshold: usize,
    pub release_flush_threshold: usize,
    pub association_flush_threshold: usize,
    pub dump_directory: String,
}

impl IngestSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            channel_capacity: env_or_default("INGEST_CHANNEL_CAPACITY", "10000").parse()?,
            primary_flush_threshold: env_or_default("INGEST_PRIMARY_FLUSH_THRESHOLD", "5000")
                .parse()?,
            release_flush_threshold: env_or_default("INGEST_RELEASE_FLUSH_THRESHOLD", "2000")
                .parse()?,
            association_flush_threshold: env_or_default(
                "INGEST_ASSOCIATION_FLUSH_THRESHOLD",
                "5000",
            )
            .parse()?,
            dump_directory: env_or_default("INGEST_DUMP_DIRECTORY", "./dumps"),
        })
    }
}

/// Collection sync coordinator knobs.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub page_size: u32,
    pub state_ttl: Duration,
    pub max_pages_in_flight: usize,
    pub max_releases_per_sync: usize,
    pub api_request_ttl: Duration,
    /// How long a user's collection may go unsynced before the periodic
    /// sweep (§4.6.1) triggers a fresh sync for them.
    pub sweep_staleness: Duration,
    /// How often the sweep itself runs (a poll interval, not a per-user one).
    pub sweep_interval: Duration,
}

impl SyncSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            page_size: env_or_default("SYNC_PAGE_SIZE", "100").parse()?,
            state_ttl: Duration::from_secs(
                env_or_default("SYNC_STATE_TTL_SECONDS", "7200").parse()?,
            ),
            max_pages_in_flight: env_or_default("SYNC_MAX_PAGES_IN_FLIGHT", "4").parse()?,
            max_releases_per_sync: env_or_default("SYNC_MAX_RELEASES_PER_SYNC", "50000").parse()?,
            api_request_ttl: Duration::from_secs(
                env_or_default("SYNC_API_REQUEST_TTL_SECONDS", "600").parse()?,
            ),
            sweep_staleness: Duration::from_secs(
                env_or_default("SYNC_SWEEP_STALENESS_SECONDS", "86400").parse()?,
            ),
            sweep_interval: Duration::from_secs(
                env_or_default("SYNC_SWEEP_INTERVAL_SECONDS", "900").parse()?,
            ),
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub rate_limit: RateLimitSettings,
    pub ingest: IngestSettings,
    pub sync: SyncSettings,
    pub cors_allowed_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            environment: Environment::from_env(),
            server: ServerConfig::from_env(),
            database: DatabaseSettings::from_env()?,
            redis: RedisSettings::from_env()?,
            rate_limit: RateLimitSettings::from_env()?,
            ingest: IngestSettings::from_env()?,
            sync: SyncSettings::from_env()?,
            cors_allowed_origins: get_allowed_origins_from_env(),
        };

        if config.environment.is_production() {
            config.validate_production()?;
        }

        Ok(config)
    }

    fn validate_production(&self) -> anyhow::Result<()> {
        if self.cors_allowed_origins.is_empty() {
            anyhow::bail!("CORS_ALLOWED_ORIGINS must be set in production");
        }
        for origin in &self.cors_allowed_origins {
            if origin.contains("localhost") || origin.contains("127.0.0.1") {
                anyhow::bail!("production CORS origins must not reference localhost: {origin}");
            }
            if !origin.starts_with("https://") {
                anyhow::bail!("production CORS origins must use https: {origin}");
            }
        }
        Ok(())
    }
}

fn get_allowed_origins_from_env() -> Vec<String> {
    std::env::var("CORS_ALLOWED_ORIGINS")
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn require_env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("missing required environment variable: {key}"))
}

fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_defaults_match_spec() {
        let defaults = RateLimitSettings::default();
        assert_eq!(defaults.limit, 5);
        assert_eq!(defaults.window, Duration::from_secs(60));
        assert_eq!(defaults.throttle_medium_delay, Duration::from_secs(1));
        assert_eq!(defaults.throttle_high_delay, Duration::from_secs(2));
    }

    #[test]
    fn environment_parses_common_spellings() {
        std::env::set_var("ENVIRONMENT", "prod");
        assert!(Environment::from_env().is_production());
        std::env::set_var("ENVIRONMENT", "development");
        assert!(!Environment::from_env().is_production());
        std::env::remove_var("ENVIRONMENT");
    }
}

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string. When unset, recipients are kept in memory
    /// and do not survive a restart.
    pub database_url: Option<String>,

    /// Maximum number of PostgreSQL connections in the pool (default: 10)
    pub db_max_connections: u32,

    /// Redis connection string. When set, observer events are also published
    /// on `events_channel`.
    pub redis_url: Option<String>,

    /// Redis pub/sub channel for observer events (default: "relay:events")
    pub events_channel: String,

    /// Base URL of the messaging gateway
    pub gateway_url: String,

    /// Bearer token presented to the messaging gateway
    pub gateway_token: Option<String>,

    /// Gateway request timeout in milliseconds (default: 15000)
    pub gateway_timeout_ms: u64,

    /// Address the API server binds to (default: 0.0.0.0:3000)
    pub bind_addr: String,

    /// Lower bound of the pacing delay between recipients, in milliseconds
    pub dispatch_delay_min_ms: u64,

    /// Upper bound of the pacing delay between recipients, in milliseconds
    pub dispatch_delay_max_ms: u64,

    /// Number of pending recipients fetched per cursor page (default: 100)
    pub dispatch_page_size: usize,

    /// Largest recipient count accepted for generated batches (default: 5000)
    pub dispatch_max_quantity: usize,

    /// Allow `resume: true` start commands to skip the purge (default: false)
    pub dispatch_resume_enabled: bool,

    /// Interval between transport health checks, in seconds (default: 30)
    pub transport_health_interval_secs: u64,

    /// Emit logs as JSON lines instead of human-readable text
    pub log_json: bool,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: optional_var("DATABASE_URL"),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 10)?,
            redis_url: optional_var("REDIS_URL"),
            events_channel: std::env::var("RELAY_EVENTS_CHANNEL")
                .unwrap_or_else(|_| "relay:events".to_string()),
            gateway_url: std::env::var("GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            gateway_token: optional_var("GATEWAY_TOKEN"),
            gateway_timeout_ms: parse_var("GATEWAY_TIMEOUT_MS", 15_000)?,
            bind_addr: std::env::var("API_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            dispatch_delay_min_ms: parse_var("DISPATCH_DELAY_MIN_MS", 4_000)?,
            dispatch_delay_max_ms: parse_var("DISPATCH_DELAY_MAX_MS", 9_000)?,
            dispatch_page_size: parse_var("DISPATCH_PAGE_SIZE", 100)?,
            dispatch_max_quantity: parse_var("DISPATCH_MAX_QUANTITY", 5_000)?,
            dispatch_resume_enabled: parse_var("DISPATCH_RESUME_ENABLED", false)?,
            transport_health_interval_secs: parse_var("TRANSPORT_HEALTH_INTERVAL_SECS", 30)?,
            log_json: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would make the dispatch loop misbehave.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.dispatch_delay_min_ms > self.dispatch_delay_max_ms {
            anyhow::bail!(
                "DISPATCH_DELAY_MIN_MS ({}) must not exceed DISPATCH_DELAY_MAX_MS ({})",
                self.dispatch_delay_min_ms,
                self.dispatch_delay_max_ms
            );
        }
        if self.dispatch_page_size == 0 {
            anyhow::bail!("DISPATCH_PAGE_SIZE must be greater than zero");
        }
        if self.db_max_connections == 0 {
            anyhow::bail!("DB_MAX_CONNECTIONS must be greater than zero");
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 10,
            redis_url: None,
            events_channel: "relay:events".to_string(),
            gateway_url: "http://localhost:8080".to_string(),
            gateway_token: None,
            gateway_timeout_ms: 15_000,
            bind_addr: "0.0.0.0:3000".to_string(),
            dispatch_delay_min_ms: 4_000,
            dispatch_delay_max_ms: 9_000,
            dispatch_page_size: 100,
            dispatch_max_quantity: 5_000,
            dispatch_resume_enabled: false,
            transport_health_interval_secs: 30,
            log_json: false,
        }
    }
}

/// Read an optional variable, treating an empty value as unset.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match optional_var(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: std::str::FromStr>(name: &str, raw: &str) -> anyhow::Result<T> {
    raw.trim().parse().map_err(|_| {
        anyhow::anyhow!(
            "{} must be a valid {}, got '{}'",
            name,
            std::any::type_name::<T>(),
            raw
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_accepts_numbers_and_bools() {
        assert_eq!(parse_value::<u64>("X", " 1500 ").unwrap(), 1500);
        assert!(parse_value::<bool>("X", "true").unwrap());
    }

    #[test]
    fn test_parse_value_names_the_variable() {
        let err = parse_value::<u64>("DISPATCH_DELAY_MIN_MS", "soon").unwrap_err();
        assert!(err.to_string().contains("DISPATCH_DELAY_MIN_MS"));
        assert!(err.to_string().contains("soon"));
    }

    #[test]
    fn test_validate_rejects_inverted_delay_window() {
        let config = AppConfig {
            dispatch_delay_min_ms: 10,
            dispatch_delay_max_ms: 5,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let config = AppConfig {
            dispatch_page_size: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }
}

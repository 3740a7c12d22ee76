//! Process configuration
//!
//! Loads the server, scheduler and platform settings from an optional TOML file and
//! `TIERFOLIO_*` environment variables. Nested keys use a double underscore, e.g.
//! `TIERFOLIO_PLATFORM__CURRENCY_RATE=84.5`.

use config::{Config, ConfigError, Environment, File};
use income_engine::PlanTerms;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tierfolio_core::PlatformSettings;
use tracing::{info, warn};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/tierfolio.toml";

/// Top-level process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP bind address
    pub bind_address: SocketAddr,

    /// Deployment environment (development, staging, production)
    pub environment: String,

    /// CORS allowed origins; empty allows any origin
    pub cors_origins: Vec<String>,

    /// Seconds between scheduler ticks
    pub tick_secs: u64,

    /// Token expected in `x-admin-token` on admin routes
    pub admin_token: Option<String>,

    /// Token the on-chain transfer watcher sends in `x-hook-token`; the hook is
    /// disabled without one
    pub hook_token: Option<String>,

    pub logging: LoggingConfig,

    /// Initial admin settings, published as version 1
    pub platform: PlatformSettings,

    /// Plans created in the catalog at startup
    pub plans: Vec<PlanTerms>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8080),
            environment: "development".to_string(),
            cors_origins: vec!["http://localhost:3000".to_string()],
            tick_secs: 60,
            admin_token: None,
            hook_token: None,
            logging: LoggingConfig::default(),
            platform: PlatformSettings::default(),
            plans: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from the given file (if present) and the environment
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("TIERFOLIO")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validates the configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_secs == 0 {
            return Err(ConfigError::Message(
                "Tick interval must be greater than 0".to_string(),
            ));
        }

        if matches!(&self.admin_token, Some(token) if token.trim().is_empty()) {
            return Err(ConfigError::Message(
                "Admin token cannot be empty".to_string(),
            ));
        }

        if matches!(&self.hook_token, Some(token) if token.trim().is_empty()) {
            return Err(ConfigError::Message(
                "Transfer hook token cannot be empty".to_string(),
            ));
        }

        self.platform
            .validate()
            .map_err(|err| ConfigError::Message(format!("platform settings: {}", err)))?;

        for terms in &self.plans {
            terms
                .validate()
                .map_err(|err| ConfigError::Message(format!("plan '{}': {}", terms.name, err)))?;
        }

        Ok(())
    }

    /// Logs the loaded configuration (without the admin token)
    pub fn log_summary(&self) {
        info!("Configuration loaded:");
        info!("  Environment: {}", self.environment);
        info!("  Bind Address: {}", self.bind_address);
        info!("  Tick interval: {}s", self.tick_secs);
        info!("  Currency rate: {} INR/USDT", self.platform.currency_rate);
        info!("  Seed plans: {}", self.plans.len());

        if self.admin_token.is_none() {
            warn!("No admin token configured, admin routes are open. Set TIERFOLIO_ADMIN_TOKEN outside development!");
        }
        if self.hook_token.is_none() {
            warn!("No transfer hook token configured, on-chain deposit events will be refused");
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Directory for the daily rolling JSON log
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: "logs".to_string(),
        }
    }
}

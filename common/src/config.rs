// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub feed: FeedConfig,
    pub telegram: TelegramConfig,
    pub scraper: ScraperConfig,
    pub notifier: NotifierConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Empty URL keeps all state in process memory
    #[serde(default)]
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub menu_url: String,
    pub category_url: String,
    pub referer: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub api_base_url: String,
    #[serde(default)]
    pub bot_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Seven-field cron expression evaluated in the notifier timezone
    pub cron_expression: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub timezone: String,
    pub location_name: String,
    #[serde(default = "default_reschedule_margin_minutes")]
    pub reschedule_margin_minutes: u16,
}

fn default_reschedule_margin_minutes() -> u16 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let defaults = Config::try_from(&Settings::default())?;

        let builder = Config::builder()
            // Built-in defaults, so every file key is optional
            .add_source(defaults)
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if !self.database.url.is_empty() && self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        if self.feed.menu_url.is_empty() {
            return Err("Feed menu_url cannot be empty".to_string());
        }
        if self.feed.category_url.is_empty() {
            return Err("Feed category_url cannot be empty".to_string());
        }
        if self.feed.timeout_seconds == 0 {
            return Err("Feed timeout_seconds must be greater than 0".to_string());
        }

        if self.telegram.api_base_url.is_empty() {
            return Err("Telegram api_base_url cannot be empty".to_string());
        }

        if let Err(e) = crate::schedule::parse_cron_expression(&self.scraper.cron_expression) {
            return Err(e.to_string());
        }

        if let Err(e) = crate::civil::CivilCalendar::from_name(&self.notifier.timezone) {
            return Err(e.to_string());
        }
        if self.notifier.location_name.is_empty() {
            return Err("Notifier location_name cannot be empty".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 5,
                min_connections: 1,
                connect_timeout_seconds: 30,
            },
            feed: FeedConfig {
                menu_url: "https://swp.webspeiseplan.de/index.php?token=55ed21609e26bbf68ba2b19390bf7961&model=menu&location=9601&languagetype=1".to_string(),
                category_url: "https://swp.webspeiseplan.de/index.php?token=55ed21609e26bbf68ba2b19390bf7961&model=mealCategory&location=9601&languagetype=1".to_string(),
                referer: "https://swp.webspeiseplan.de/Menu".to_string(),
                timeout_seconds: 30,
            },
            telegram: TelegramConfig {
                api_base_url: "https://api.telegram.org".to_string(),
                bot_token: String::new(),
            },
            scraper: ScraperConfig {
                // Every 10 minutes during opening hours, Monday to Friday
                cron_expression: "0 */10 8-14 * * Mon-Fri *".to_string(),
            },
            notifier: NotifierConfig {
                timezone: "Europe/Berlin".to_string(),
                location_name: "Griebnitzsee".to_string(),
                reschedule_margin_minutes: default_reschedule_margin_minutes(),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: 9090,
                tracing_endpoint: None,
            },
        }
    }
}

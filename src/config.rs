use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Application configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub scoring: ScoringConfig,
    pub geocoder: GeocoderConfig,
    pub ingestion: IngestionConfig,
    pub queue: QueueConfig,
    pub leaderboard: LeaderboardConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

/// Point table used by the score calculator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Awarded for every completed visit
    pub points_for_knock: i64,
    /// A modified resident whose canvass response changed
    pub canvass_response_change: i64,
    /// A modified resident whose party affiliation changed
    pub party_affiliation_change: i64,
    /// A resident first recorded by this visit
    pub new_resident: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeocoderConfig {
    /// JSON file of recorded geocoder responses
    pub fixture_path: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionConfig {
    pub max_conflict_retries: u32,
    pub retry_base_ms: u64,
    pub retry_cap_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub capacity: usize,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardConfig {
    /// Rows shown on each side of the requesting user, 0 for the full board
    pub window: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            points_for_knock: 5,
            canvass_response_change: 2,
            party_affiliation_change: 1,
            new_resident: 0,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            retry_base_ms: 20,
            retry_cap_ms: 500,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            max_attempts: 5,
            retry_base_ms: 250,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "data/ground_game.db".to_string(),
                max_connections: 4,
                connection_timeout_secs: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
            scoring: ScoringConfig::default(),
            geocoder: GeocoderConfig {
                fixture_path: "config/geocoder.json".to_string(),
                timeout_ms: 5000,
            },
            ingestion: IngestionConfig::default(),
            queue: QueueConfig::default(),
            leaderboard: LeaderboardConfig { window: 25 },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        let defaults = Config::try_from(&AppConfig::default())
            .context("Failed to serialize default configuration")?;

        let config = Config::builder()
            // Start with default values
            .add_source(defaults)
            // Add config files if they exist
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("ground_game").required(false))
            // Add environment variables with prefix, e.g. GROUND_GAME__DATABASE__URL
            .add_source(Environment::with_prefix("GROUND_GAME").separator("__"))
            .build()
            .context("Failed to load configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(anyhow::anyhow!("database.url must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be greater than 0"));
        }
        if self.database.connection_timeout_secs == 0 {
            return Err(anyhow::anyhow!("connection_timeout_secs must be greater than 0"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        let scoring = &self.scoring;
        if scoring.points_for_knock < 0
            || scoring.canvass_response_change < 0
            || scoring.party_affiliation_change < 0
            || scoring.new_resident < 0
        {
            return Err(anyhow::anyhow!("scoring points must not be negative"));
        }

        if self.geocoder.timeout_ms == 0 {
            return Err(anyhow::anyhow!("geocoder.timeout_ms must be greater than 0"));
        }

        if self.ingestion.retry_base_ms > self.ingestion.retry_cap_ms {
            return Err(anyhow::anyhow!("ingestion.retry_base_ms must not exceed retry_cap_ms"));
        }

        if self.queue.capacity == 0 {
            return Err(anyhow::anyhow!("queue.capacity must be greater than 0"));
        }
        if self.queue.max_attempts == 0 {
            return Err(anyhow::anyhow!("queue.max_attempts must be greater than 0"));
        }

        Ok(())
    }

    /// Render the effective configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to render configuration")
    }

    /// Get log level from environment or config
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }
}

use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for VCF Roundup
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoundupConfig {
    /// Operator allow-list and panel settings
    pub operators: OperatorConfig,
    /// Broadcast engine tuning
    pub broadcast: BroadcastConfig,
    /// Contact-file distribution settings
    pub distribution: DistributionConfig,
    /// Liveness probe settings
    pub health: HealthConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OperatorConfig {
    /// User ids allowed to run operator commands. This is a static
    /// precondition, not an auth system.
    pub allowed_ids: Vec<i64>,
    /// Groups shown per page in the groupStats view
    pub stats_page_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BroadcastConfig {
    /// Emit a progress update every N processed recipients
    pub progress_interval: usize,
    /// Sends per second against the chat transport
    pub sends_per_second: u32,
    /// Burst capacity for the send limiter
    pub burst_capacity: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DistributionConfig {
    /// Destination channel/location for approved contact-file artifacts
    pub destination: String,
    /// Watermark suffix appended to contact display names
    pub watermark: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    /// Port the liveness probe listens on
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level for the env-filter default
    pub log_level: String,
    /// Emit logs as JSON
    pub json_logs: bool,
}

impl Default for RoundupConfig {
    fn default() -> Self {
        Self {
            operators: OperatorConfig {
                allowed_ids: Vec::new(),
                stats_page_size: 2,
            },
            broadcast: BroadcastConfig {
                progress_interval: 20,
                sends_per_second: 20,
                burst_capacity: 5,
            },
            distribution: DistributionConfig {
                destination: "@vcfdownload".to_string(),
                watermark: String::new(),
            },
            health: HealthConfig { port: 10000 },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: true,
            },
        }
    }
}

impl RoundupConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (vcf-roundup.toml)
    /// 3. Environment variables (prefixed with VCF_ROUNDUP_)
    pub fn load() -> Result<Self> {
        let defaults = Config::try_from(&RoundupConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if Path::new("vcf-roundup.toml").exists() {
            builder = builder.add_source(File::with_name("vcf-roundup"));
        }

        builder = builder.add_source(
            Environment::with_prefix("VCF_ROUNDUP")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("operators.allowed_ids"),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }

    pub fn is_operator(&self, user_id: i64) -> bool {
        self.operators.allowed_ids.contains(&user_id)
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<RoundupConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = RoundupConfig::load_env_file();
        RoundupConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static RoundupConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}

use serde::Deserialize;
use service_core::config::{self as core_config, get_env};
use service_core::error::AppError;
use service_core::observability::LogFormat;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct BookkeepingConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub mongodb: MongoConfig,
    pub store: StoreConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    /// How long startup keeps retrying an unreachable server.
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Minimum digits of the per-period counter in document ids.
    pub sequence_counter_width: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub otlp_endpoint: Option<String>,
}

impl BookkeepingConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let mut common = core_config::Config::load()?;
        let is_prod = core_config::is_prod();

        let timeout = common.request_timeout_secs.to_string();
        common.request_timeout_secs = parse(
            "REQUEST_TIMEOUT_SECS",
            &get_env("REQUEST_TIMEOUT_SECS", Some(&timeout), false)?,
        )?;

        let backend: StoreBackend = get_env("STORE_BACKEND", Some("mongo"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        // The memory backend needs no database settings.
        let mongo_required = is_prod && backend == StoreBackend::Mongo;
        let mongodb = MongoConfig {
            uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), mongo_required)?,
            database: get_env("MONGODB_DATABASE", Some("bookkeeping_db"), mongo_required)?,
            connect_timeout_secs: parse(
                "MONGODB_CONNECT_TIMEOUT_SECS",
                &get_env("MONGODB_CONNECT_TIMEOUT_SECS", Some("30"), false)?,
            )?,
        };

        Ok(BookkeepingConfig {
            common,
            mongodb,
            store: StoreConfig {
                backend,
                sequence_counter_width: parse(
                    "SEQUENCE_COUNTER_WIDTH",
                    &get_env("SEQUENCE_COUNTER_WIDTH", Some("2"), false)?,
                )?,
            },
            observability: ObservabilityConfig {
                log_level: get_env("LOG_LEVEL", Some("info"), false)?,
                log_format: get_env("LOG_FORMAT", Some("json"), false)?,
                otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            },
        })
    }

    /// Settings for an in-process instance on a random port.
    pub fn for_tests() -> Self {
        BookkeepingConfig {
            common: core_config::Config {
                port: 0,
                ..Default::default()
            },
            mongodb: MongoConfig {
                uri: "mongodb://localhost:27017".to_string(),
                database: "bookkeeping_test".to_string(),
                connect_timeout_secs: 1,
            },
            store: StoreConfig {
                backend: StoreBackend::Memory,
                sequence_counter_width: 2,
            },
            observability: ObservabilityConfig {
                log_level: "warn".to_string(),
                log_format: "pretty".to_string(),
                otlp_endpoint: None,
            },
        }
    }

    pub fn log_format(&self) -> LogFormat {
        self.observability
            .log_format
            .parse()
            .unwrap_or(LogFormat::Json)
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::ConfigError(anyhow::anyhow!("{} has invalid value '{}'", key, value)))
}

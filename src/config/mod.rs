use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{ScorerError, ScorerResult};
use crate::llm::GenerationParams;
use crate::logging::LoggingConfig;
use crate::scoring::{ScoringMode, DEFAULT_BATCH_SIZE};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LLMConfig,
    pub scoring: ScoringConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    pub api_base_url: String,
    /// Falls back to the KWS_API_KEY / OPENAI_API_KEY environment variables
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_seconds: u64,
    pub max_retries: usize,
    pub retry_delay_seconds: u64,
    pub requests_per_minute: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub mode: ScoringMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub output_directory: PathBuf,
    pub preview_rows: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = get_data_directory();

        Self {
            llm: LLMConfig {
                api_base_url: "https://api.openai.com/v1".to_string(),
                api_key: None,
                model: "gpt-4o".to_string(),
                temperature: 0.2,
                max_tokens: 500,
                request_timeout_seconds: 60,
                max_retries: 3,
                retry_delay_seconds: 2,
                requests_per_minute: 60,
            },
            scoring: ScoringConfig {
                batch_size: DEFAULT_BATCH_SIZE,
                max_concurrent_batches: 1,
                mode: ScoringMode::Keywords,
            },
            export: ExportConfig {
                output_directory: PathBuf::from("."),
                preview_rows: 15,
            },
            logging: LoggingConfig {
                log_directory: data_dir.join("logs"),
                ..LoggingConfig::default()
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from default locations
    pub async fn load() -> ScorerResult<Self> {
        let config_path = get_config_path();

        let mut config = if config_path.exists() {
            Self::read_file(&config_path).await?
        } else {
            info!("No configuration file found, using defaults");
            let config = Self::default();
            config.save().await?;
            config
        };

        ConfigOverrides::apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from specific file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ScorerResult<Self> {
        let mut config = Self::read_file(path.as_ref()).await?;

        ConfigOverrides::apply(&mut config);
        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    async fn read_file(path: &Path) -> ScorerResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        toml::from_str(&content).map_err(|e| {
            ScorerError::config(format!("invalid configuration file {}: {}", path.display(), e))
        })
    }

    /// Save configuration to default location
    pub async fn save(&self) -> ScorerResult<()> {
        let config_path = get_config_path();

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ScorerError::config(format!("cannot serialize configuration: {}", e)))?;
        tokio::fs::write(&config_path, content).await?;

        info!("Configuration saved to: {}", config_path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> ScorerResult<()> {
        if !(0.0..=1.0).contains(&self.llm.temperature) {
            return Err(ScorerError::config("LLM temperature must be between 0.0 and 1.0"));
        }

        if self.llm.max_tokens == 0 {
            return Err(ScorerError::config("LLM max_tokens must be > 0"));
        }

        if self.llm.request_timeout_seconds == 0 {
            return Err(ScorerError::config("LLM request_timeout_seconds must be > 0"));
        }

        if self.llm.max_retries == 0 {
            return Err(ScorerError::config("LLM max_retries must be > 0"));
        }

        if self.llm.requests_per_minute == 0 {
            return Err(ScorerError::config("LLM requests_per_minute must be > 0"));
        }

        url::Url::parse(&self.llm.api_base_url)
            .map_err(|e| ScorerError::config(format!("LLM api_base_url is not a valid URL: {}", e)))?;

        if self.scoring.batch_size == 0 {
            return Err(ScorerError::InvalidBatchSize);
        }

        if self.scoring.max_concurrent_batches == 0 {
            return Err(ScorerError::config("Scoring max_concurrent_batches must be > 0"));
        }

        Ok(())
    }

    /// Generation parameters sent with every completion request
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            model: self.llm.model.clone(),
            max_output_tokens: self.llm.max_tokens,
            temperature: self.llm.temperature,
        }
    }

    /// Resolve the API key from config, then the environment
    pub fn resolve_api_key(&self) -> Option<String> {
        self.llm
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var("KWS_API_KEY").ok())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }
}

/// Get the default data directory
fn get_data_directory() -> PathBuf {
    directories::ProjectDirs::from("com", "keyword-scorer", "keyword-scorer")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default().join("data"))
}

/// Get the configuration file path
pub fn get_config_path() -> PathBuf {
    directories::ProjectDirs::from("com", "keyword-scorer", "keyword-scorer")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default().join("config.toml"))
}

/// Environment-based configuration overrides
pub struct ConfigOverrides;

impl ConfigOverrides {
    /// Apply environment variable overrides to configuration
    pub fn apply(config: &mut AppConfig) {
        Self::apply_from(config, |name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_from<F>(config: &mut AppConfig, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // LLM overrides
        if let Some(base_url) = var("KWS_API_BASE_URL") {
            config.llm.api_base_url = base_url;
        }

        if let Some(model) = var("KWS_MODEL") {
            config.llm.model = model;
        }

        if let Some(temp) = var("KWS_TEMPERATURE").and_then(|v| v.parse::<f32>().ok()) {
            config.llm.temperature = temp;
        }

        if let Some(timeout) = var("KWS_REQUEST_TIMEOUT").and_then(|v| v.parse::<u64>().ok()) {
            config.llm.request_timeout_seconds = timeout;
        }

        if let Some(rpm) = var("KWS_REQUESTS_PER_MINUTE").and_then(|v| v.parse::<u32>().ok()) {
            config.llm.requests_per_minute = rpm;
        }

        // Scoring overrides
        if let Some(batch_size) = var("KWS_BATCH_SIZE").and_then(|v| v.parse::<usize>().ok()) {
            config.scoring.batch_size = batch_size;
        }

        if let Some(concurrent) = var("KWS_CONCURRENCY").and_then(|v| v.parse::<usize>().ok()) {
            config.scoring.max_concurrent_batches = concurrent;
        }

        // Export overrides
        if let Some(dir) = var("KWS_OUTPUT_DIR") {
            config.export.output_directory = PathBuf::from(dir);
        }

        // Logging overrides
        if let Some(log_level) = var("KWS_LOG_LEVEL") {
            config.logging.level = log_level;
        }
    }
}

//! Pipeline configuration
//!
//! Resolution order: built-in defaults, then an optional YAML file, then
//! environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::Level;

use crate::nlq::retry::RetryPolicy;
use crate::nlq::types::QueryMode;
use crate::nlq::validator::ComplexityWeights;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    ParseError(String),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// LLM Provider options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LLMProvider {
    OpenAI,
    DeepSeek,
    Ollama,
}

impl LLMProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LLMProvider::OpenAI => "https://api.openai.com/v1",
            LLMProvider::DeepSeek => "https://api.deepseek.com",
            LLMProvider::Ollama => "http://localhost:11434",
        }
    }

    /// Hosted providers authenticate with a bearer key; a local Ollama does not
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, LLMProvider::Ollama)
    }
}

impl FromStr for LLMProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(LLMProvider::OpenAI),
            "deepseek" => Ok(LLMProvider::DeepSeek),
            "ollama" => Ok(LLMProvider::Ollama),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Generative backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Enabled status
    pub enabled: bool,
    pub provider: LLMProvider,
    /// Model name (e.g., "deepseek-chat", "gpt-4o", "llama3")
    pub model: String,
    /// API Key (optional for Ollama)
    pub api_key: Option<String>,
    /// API Base URL; the provider default is used when unset
    pub api_base_url: Option<String>,
    /// Overrides the built-in system prompt
    pub system_prompt: Option<String>,
    /// Per-call timeout
    pub timeout_secs: u64,
    /// Total attempts per generation, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: LLMProvider::DeepSeek,
            model: "deepseek-chat".to_string(),
            api_key: None,
            api_base_url: None,
            system_prompt: None,
            timeout_secs: 30,
            max_attempts: 3,
            initial_backoff_ms: 1000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 10_000,
            temperature: 0.1,
            max_tokens: 2000,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
        }
    }
}

impl GenerationConfig {
    pub fn base_url(&self) -> String {
        self.api_base_url
            .clone()
            .unwrap_or_else(|| self.provider.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            multiplier: self.backoff_multiplier,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    /// Whether the generative path can run at all with these settings
    pub fn is_usable(&self) -> bool {
        self.enabled && (!self.provider.requires_api_key() || self.api_key.is_some())
    }
}

/// Strategy selection, fallback and caching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub mode: QueryMode,
    /// Question complexity above which hybrid mode prefers the generative path
    pub complexity_threshold: u32,
    /// Generative failed → try pattern
    pub generative_fallback_enabled: bool,
    /// Pattern failed → try generative
    pub pattern_fallback_enabled: bool,
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    pub metrics_capacity: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            mode: QueryMode::Hybrid,
            complexity_threshold: 6,
            generative_fallback_enabled: true,
            pattern_fallback_enabled: true,
            cache_enabled: true,
            cache_ttl_secs: 3600,
            cache_capacity: 1000,
            metrics_capacity: 1000,
        }
    }
}

impl StrategyConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Validator toggles and complexity ceiling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub enable_security_check: bool,
    pub enable_syntax_check: bool,
    pub enable_complexity_check: bool,
    pub max_complexity_score: u32,
    pub complexity_weights: ComplexityWeights,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enable_security_check: true,
            enable_syntax_check: true,
            enable_complexity_check: true,
            max_complexity_score: 15,
            complexity_weights: ComplexityWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

impl LoggingConfig {
    pub fn max_level(&self) -> Level {
        Level::from_str(self.level.trim()).unwrap_or(Level::INFO)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NLQConfig {
    pub generation: GenerationConfig,
    pub strategy: StrategyConfig,
    pub validation: ValidationConfig,
    pub logging: LoggingConfig,
}

impl NLQConfig {
    /// Defaults, then the YAML file if given, then the process environment
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(s: &str) -> ConfigResult<Self> {
        serde_yaml::from_str(s).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_env_with<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let generation = &mut self.generation;
        if let Some(v) = get("LLM_PROVIDER") {
            generation.provider = parse_value("LLM_PROVIDER", v)?;
        }
        if let Some(v) = get("LLM_API_KEY").or_else(|| get("DEEPSEEK_API_KEY")) {
            generation.api_key = Some(v.trim().to_string());
        }
        if let Some(v) = get("LLM_BASE_URL") {
            generation.api_base_url = Some(v.trim().to_string());
        }
        if let Some(v) = get("LLM_MODEL") {
            generation.model = v.trim().to_string();
        }
        if let Some(v) = get("LLM_TIMEOUT") {
            generation.timeout_secs = parse_value("LLM_TIMEOUT", v)?;
        }
        if let Some(v) = get("LLM_MAX_RETRIES") {
            generation.max_attempts = parse_value("LLM_MAX_RETRIES", v)?;
        }
        if let Some(v) = get("LLM_TEMPERATURE") {
            generation.temperature = parse_value("LLM_TEMPERATURE", v)?;
        }
        if let Some(v) = get("LLM_MAX_TOKENS") {
            generation.max_tokens = parse_value("LLM_MAX_TOKENS", v)?;
        }

        let strategy = &mut self.strategy;
        if let Some(v) = get("QUERY_MODE") {
            strategy.mode = parse_value("QUERY_MODE", v)?;
        }
        if let Some(v) = get("COMPLEXITY_THRESHOLD") {
            strategy.complexity_threshold = parse_value("COMPLEXITY_THRESHOLD", v)?;
        }
        if let Some(v) = get("LLM_FALLBACK_ENABLED") {
            strategy.generative_fallback_enabled = parse_bool("LLM_FALLBACK_ENABLED", v)?;
        }
        if let Some(v) = get("PATTERN_FALLBACK_ENABLED").or_else(|| get("RULE_FALLBACK_ENABLED")) {
            strategy.pattern_fallback_enabled = parse_bool("PATTERN_FALLBACK_ENABLED", v)?;
        }
        if let Some(v) = get("ENABLE_QUERY_CACHE") {
            strategy.cache_enabled = parse_bool("ENABLE_QUERY_CACHE", v)?;
        }
        if let Some(v) = get("CACHE_TTL") {
            strategy.cache_ttl_secs = parse_value("CACHE_TTL", v)?;
        }

        let validation = &mut self.validation;
        if let Some(v) = get("ENABLE_SECURITY_CHECK") {
            validation.enable_security_check = parse_bool("ENABLE_SECURITY_CHECK", v)?;
        }
        if let Some(v) = get("ENABLE_SYNTAX_CHECK") {
            validation.enable_syntax_check = parse_bool("ENABLE_SYNTAX_CHECK", v)?;
        }
        if let Some(v) = get("ENABLE_COMPLEXITY_CHECK") {
            validation.enable_complexity_check = parse_bool("ENABLE_COMPLEXITY_CHECK", v)?;
        }
        if let Some(v) = get("MAX_COMPLEXITY_SCORE") {
            validation.max_complexity_score = parse_value("MAX_COMPLEXITY_SCORE", v)?;
        }

        if let Some(v) = get("LOG_LEVEL") {
            self.logging.level = v.trim().to_ascii_lowercase();
        }

        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let g = &self.generation;
        if g.timeout_secs == 0 {
            return Err(ConfigError::Invalid("generation.timeout_secs must be positive".to_string()));
        }
        if g.max_attempts == 0 {
            return Err(ConfigError::Invalid("generation.max_attempts must be at least 1".to_string()));
        }
        if !(0.0..=2.0).contains(&g.temperature) {
            return Err(ConfigError::Invalid(format!(
                "generation.temperature must be within [0, 2], got {}",
                g.temperature
            )));
        }
        if g.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid("generation.backoff_multiplier must be >= 1".to_string()));
        }

        let s = &self.strategy;
        if s.cache_enabled && (s.cache_ttl_secs == 0 || s.cache_capacity == 0) {
            return Err(ConfigError::Invalid(
                "strategy.cache_ttl_secs and strategy.cache_capacity must be positive when caching is enabled"
                    .to_string(),
            ));
        }
        if s.metrics_capacity == 0 {
            return Err(ConfigError::Invalid("strategy.metrics_capacity must be positive".to_string()));
        }

        if self.validation.max_complexity_score == 0 {
            return Err(ConfigError::Invalid("validation.max_complexity_score must be positive".to_string()));
        }

        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, value: String) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

fn parse_bool(key: &str, value: String) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
    }
}

//! Runtime configuration loaded from the environment (and an optional `.env` file).
//!
//! Only the completion/embedding credential is required; everything else has a default.

use crate::chunking::DEFAULT_MAX_TOKENS;
use crate::error::ConfigError;
use crate::models::{PipelineOptions, ReindexPolicy, DEFAULT_TEMPERATURE, DEFAULT_TOP_K};
use std::env;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_OPENAI_EMBEDDING_DIMENSIONS: usize = 1536;
pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-4";

/// Optional multimodal OCR endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl OcrEndpointConfig {
    /// OCR settings alone, for commands that never call the completion API.
    pub fn from_env() -> Option<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        read("LLM_OCR_ENDPOINT").map(|endpoint| Self {
            endpoint,
            api_key: read("LLM_OCR_API_KEY"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub completion_model: String,
    pub max_tokens: usize,
    pub top_k: usize,
    pub temperature: f32,
    pub ocr: Option<OcrEndpointConfig>,
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_key = optional("OPENAI_API_KEY")
            .ok_or_else(|| ConfigError::MissingCredential("OPENAI_API_KEY".to_string()))?;

        let base_url = optional("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Url::parse(&base_url).map_err(|_| ConfigError::InvalidValue {
            key: "OPENAI_BASE_URL".to_string(),
            value: base_url.clone(),
        })?;

        let ocr = OcrEndpointConfig::from_lookup(&lookup);

        let config = Self {
            api_key,
            base_url,
            embedding_model: optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            embedding_dimensions: parse_or(
                "EMBEDDING_DIMENSIONS",
                optional("EMBEDDING_DIMENSIONS"),
                DEFAULT_OPENAI_EMBEDDING_DIMENSIONS,
            )?,
            completion_model: optional("COMPLETION_MODEL")
                .unwrap_or_else(|| DEFAULT_COMPLETION_MODEL.to_string()),
            max_tokens: parse_or(
                "CHUNK_MAX_TOKENS",
                optional("CHUNK_MAX_TOKENS"),
                DEFAULT_MAX_TOKENS,
            )?,
            top_k: parse_or("RETRIEVAL_TOP_K", optional("RETRIEVAL_TOP_K"), DEFAULT_TOP_K)?,
            temperature: parse_or(
                "COMPLETION_TEMPERATURE",
                optional("COMPLETION_TEMPERATURE"),
                DEFAULT_TEMPERATURE,
            )?,
            ocr,
        };
        config.validate()?;

        tracing::debug!(
            base_url = %config.base_url,
            embedding_model = %config.embedding_model,
            completion_model = %config.completion_model,
            ocr_enabled = config.ocr.is_some(),
            "loaded configuration"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("EMBEDDING_DIMENSIONS", self.embedding_dimensions),
            ("CHUNK_MAX_TOKENS", self.max_tokens),
            ("RETRIEVAL_TOP_K", self.top_k),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: "0".to_string(),
                });
            }
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "COMPLETION_TEMPERATURE".to_string(),
                value: self.temperature.to_string(),
            });
        }
        Ok(())
    }

    pub fn pipeline_options(&self, reindex: ReindexPolicy) -> PipelineOptions {
        PipelineOptions {
            max_tokens: self.max_tokens,
            top_k: self.top_k,
            temperature: self.temperature,
            reindex,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
    }
}

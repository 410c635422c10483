//! Configuration module for import-service.

use crate::mapping::OverwritePolicy;
use secrecy::SecretString;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub suggestions: SuggestionConfig,
    pub sessions: SessionConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: SecretString,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: SecretString,
    pub cache_ttl_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    Mock,
}

impl std::str::FromStr for ProviderKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "mock" => Ok(Self::Mock),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "Unknown SUGGESTION_PROVIDER: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SuggestionConfig {
    pub provider: ProviderKind,
    pub api_key: Option<SecretString>,
    pub text_model: String,
    pub request_timeout_seconds: u64,
    pub overwrite_policy: OverwritePolicy,
}

/// Idle import sessions are dropped after `idle_ttl_seconds`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub idle_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl ImportConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let provider: ProviderKind =
            get_env("SUGGESTION_PROVIDER", Some("gemini"), is_prod)?.parse()?;
        let api_key = match provider {
            ProviderKind::Gemini => Some(SecretString::new(get_env(
                "GOOGLE_API_KEY",
                None,
                is_prod,
            )?)),
            ProviderKind::Mock => env::var("GOOGLE_API_KEY").ok().map(SecretString::new),
        };

        let overwrite_policy = get_env("MAPPING_OVERWRITE_POLICY", Some("preserve_user_edits"), false)?
            .parse::<OverwritePolicy>()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "import-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: SecretString::new(get_env("DATABASE_URL", None, is_prod)?),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2),
            },
            redis: RedisConfig {
                url: SecretString::new(get_env(
                    "REDIS_URL",
                    Some("redis://127.0.0.1:6379"),
                    is_prod,
                )?),
                cache_ttl_seconds: parse_env("CACHE_TTL_SECONDS", 300),
            },
            suggestions: SuggestionConfig {
                provider,
                api_key,
                text_model: get_env("GENAI_TEXT_MODEL", Some("gemini-2.0-flash"), is_prod)?,
                request_timeout_seconds: parse_env("SUGGESTION_TIMEOUT_SECONDS", 60),
                overwrite_policy,
            },
            sessions: SessionConfig {
                idle_ttl_seconds: parse_env("IMPORT_SESSION_TTL_SECONDS", 3600),
                sweep_interval_seconds: parse_env("IMPORT_SESSION_SWEEP_SECONDS", 60),
            },
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

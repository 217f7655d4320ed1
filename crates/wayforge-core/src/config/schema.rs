//! Config structs loaded from environment variables, grouped by domain.

use super::env_keys::{confirm, oracle as oracle_keys, paths};
use super::loader::{env_bool, env_optional, env_or};
use std::path::PathBuf;

/// Which oracle backend a request targets. Inferred from the configured
/// model name / API base, never hardcoded by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleBackend {
    OpenAiCompat,
    Claude,
}

/// One configured oracle provider's connection details.
#[derive(Debug, Clone)]
pub struct OracleProviderConfig {
    pub backend: OracleBackend,
    pub api_base: String,
    pub api_key: String,
    pub model: String,
}

impl OracleProviderConfig {
    /// Build the provider list from environment variables, in priority
    /// order: an explicit Claude key first (native tool format, generally
    /// the stronger default for code generation), then OpenAI-compatible.
    /// Only providers with a non-empty API key are included.
    pub fn from_env() -> Vec<Self> {
        super::loader::load_dotenv();
        let mut providers = Vec::new();

        if let Some(key) = env_optional(oracle_keys::ANTHROPIC_API_KEY, &[]) {
            let api_base = env_or(oracle_keys::ANTHROPIC_API_BASE, &[], || {
                "https://api.anthropic.com".to_string()
            });
            let model = env_or(oracle_keys::MODEL, oracle_keys::MODEL_ALIASES, || {
                "claude-sonnet-4-5".to_string()
            });
            providers.push(Self {
                backend: OracleBackend::Claude,
                api_base,
                api_key: key,
                model,
            });
        }

        if let Some(key) = env_optional(oracle_keys::OPENAI_API_KEY, &[]) {
            let api_base = env_or(oracle_keys::OPENAI_API_BASE, &[], || {
                "https://api.openai.com/v1".to_string()
            });
            let model = env_or(oracle_keys::MODEL, oracle_keys::MODEL_ALIASES, || {
                "gpt-4o".to_string()
            });
            providers.push(Self {
                backend: OracleBackend::OpenAiCompat,
                api_base,
                api_key: key,
                model,
            });
        }

        providers
    }
}

/// Workspace / output path configuration.
#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub workspace: PathBuf,
    pub output_dir: Option<PathBuf>,
}

impl PathsConfig {
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        let workspace = env_optional(paths::WORKSPACE, &[])
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let output_dir = env_optional(paths::OUTPUT_DIR, &[]).map(PathBuf::from);
        Self { workspace, output_dir }
    }
}

/// Confirmation-gate feature flags.
#[derive(Debug, Clone)]
pub struct ConfirmConfig {
    /// Tool names that always require confirmation beyond the built-in
    /// write/shell rules (fail-open extension point).
    pub extra_confirm: Vec<String>,
}

impl ConfirmConfig {
    pub fn from_env() -> Self {
        let raw = env_optional(confirm::HIGH_RISK_CONFIRM, &[]).unwrap_or_default();
        let extra_confirm = raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self { extra_confirm }
    }
}

/// Logging / observability configuration.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub json: bool,
    pub quiet: bool,
}

impl ObservabilityConfig {
    pub fn from_env() -> Self {
        use super::env_keys::observability::*;
        Self {
            log_level: env_or(LOG_LEVEL, &[], || "wayforge=info".to_string()),
            json: env_bool(LOG_JSON, &[], false),
            quiet: env_bool(QUIET, &[], false),
        }
    }
}

//! Configuration for the Hermes orchestration service
//!
//! Provides parsing and management for the service settings: server
//! address, database location, completion provider, search provider,
//! turn budgets, sub-agent policy, and static auth tokens.
//!
//! # Configuration File Format
//!
//! TOML format in `hermes.toml`:
//!
//! ```toml
//! [server]
//! listen_addr = "127.0.0.1:8787"
//!
//! [llm]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o"
//! title_model = "gpt-4o-mini"
//!
//! [limits]
//! max_iterations = 12
//! soft_token_limit = 140000
//! hard_token_limit = 150000
//!
//! [sub_agents]
//! update_policy = "append"
//!
//! [auth.tokens]
//! dev-token = "7b3e9a04-4a3f-4f6e-9c1a-2f6d1f6b8e21"
//! ```

use crate::error::{HermesError, Result};
use crate::types::{PromptUpdatePolicy, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Complete configuration for the Hermes service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HermesConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseSettings,

    /// Completion provider settings
    #[serde(default)]
    pub llm: LlmSettings,

    /// Web search/read provider settings
    #[serde(default)]
    pub search: SearchSettings,

    /// Per-turn budget settings
    #[serde(default)]
    pub limits: TurnLimits,

    /// Sub-agent tool settings
    #[serde(default)]
    pub sub_agents: SubAgentSettings,

    /// Static bearer-token auth settings
    #[serde(default)]
    pub auth: AuthSettings,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address the API server binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// Database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Path to the libsql database file; empty uses the platform data dir
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { path: None }
    }
}

impl DatabaseSettings {
    /// Resolve the configured path, falling back to the platform default
    pub fn resolve_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => path.clone(),
            None => default_db_path(),
        }
    }
}

/// Completion provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Provider base URL (OpenAI-compatible chat completions)
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// API key; environment variables take precedence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model driving the turn loop
    #[serde(default = "default_model")]
    pub model: String,

    /// Cheaper model for title generation
    #[serde(default = "default_title_model")]
    pub title_model: String,

    /// Max tokens per completion response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: None,
            model: default_model(),
            title_model: default_title_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl LlmSettings {
    /// Get the API key from:
    /// 1. Environment variable HERMES_API_KEY
    /// 2. Environment variable OPENAI_API_KEY
    /// 3. The config file
    pub fn resolve_api_key(&self) -> Result<String> {
        for var in ["HERMES_API_KEY", "OPENAI_API_KEY"] {
            if let Ok(key) = env::var(var) {
                if !key.is_empty() {
                    tracing::debug!("Using API key from {} environment variable", var);
                    return Ok(key);
                }
            }
        }

        match &self.api_key {
            Some(key) if !key.is_empty() => Ok(key.clone()),
            _ => Err(HermesError::Config(config::ConfigError::Message(
                "LLM API key not found. Set HERMES_API_KEY or add llm.api_key to hermes.toml"
                    .to_string(),
            ))),
        }
    }
}

/// Web search/read provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Base URL of the search collaborator exposing /search and /read
    #[serde(default = "default_search_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            base_url: default_search_base_url(),
            timeout_secs: default_search_timeout(),
        }
    }
}

/// Per-turn budget settings
///
/// Constants of the turn state machine. `soft_token_limit` leaves headroom
/// below `hard_token_limit` for one more completion call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TurnLimits {
    /// Max tool-calling iterations per turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Cumulative token count that forces the next call to finish
    #[serde(default = "default_soft_token_limit")]
    pub soft_token_limit: u64,

    /// Cumulative token count that ends the turn with a finalize call
    #[serde(default = "default_hard_token_limit")]
    pub hard_token_limit: u64,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            soft_token_limit: default_soft_token_limit(),
            hard_token_limit: default_hard_token_limit(),
        }
    }
}

/// Sub-agent tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentSettings {
    /// How update_sub_agent combines prompts
    #[serde(default)]
    pub update_policy: PromptUpdatePolicy,

    /// Character cap for prompt previews in listings
    #[serde(default = "default_preview_len")]
    pub preview_len: usize,
}

impl Default for SubAgentSettings {
    fn default() -> Self {
        Self {
            update_policy: PromptUpdatePolicy::default(),
            preview_len: default_preview_len(),
        }
    }
}

/// Static bearer-token auth settings
///
/// Maps opaque tokens to user ids. A stand-in for a real identity
/// provider; the seam is the IdentityProvider trait in the api module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    /// token -> user id
    #[serde(default)]
    pub tokens: HashMap<String, UserId>,
}

// Default value helpers
fn default_listen_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_title_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

fn default_request_timeout() -> u64 {
    120
}

fn default_search_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_search_timeout() -> u64 {
    15
}

fn default_max_iterations() -> u32 {
    12
}

fn default_soft_token_limit() -> u64 {
    140_000
}

fn default_hard_token_limit() -> u64 {
    150_000
}

fn default_preview_len() -> usize {
    200
}

/// Default database location under the platform data directory
pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hermes")
        .join("hermes.db")
}

impl HermesConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("Config file not found, using defaults: {:?}", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            HermesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file: {}", e),
            ))
        })?;

        let config: HermesConfig = toml::from_str(&content)
            .map_err(|e| HermesError::Other(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| HermesError::Other(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                HermesError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create config directory: {}", e),
                ))
            })?;
        }

        std::fs::write(path, content).map_err(|e| {
            HermesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write config file: {}", e),
            ))
        })?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Check invariants the turn loop depends on
    pub fn validate(&self) -> Result<()> {
        if self.limits.max_iterations == 0 {
            return Err(HermesError::Config(config::ConfigError::Message(
                "limits.max_iterations must be at least 1".to_string(),
            )));
        }

        if self.limits.soft_token_limit >= self.limits.hard_token_limit {
            return Err(HermesError::Config(config::ConfigError::Message(
                "limits.soft_token_limit must be below limits.hard_token_limit".to_string(),
            )));
        }

        Ok(())
    }

    /// Get the default config path
    pub fn default_path() -> PathBuf {
        PathBuf::from("hermes.toml")
    }
}

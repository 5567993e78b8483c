use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub routing: RoutingConfig,
    pub orchestration: OrchestrationConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct MemoryConfig {
    pub ttl_secs: u64,
    pub history_limit: usize,
}

#[derive(Clone, Debug)]
pub struct RoutingConfig {
    /// When false the deterministic scorer handles every request.
    pub use_llm_classifier: bool,
}

#[derive(Clone, Debug)]
pub struct OrchestrationConfig {
    pub max_tool_dispatches: u32,
    pub duplicate_window: usize,
    pub max_concurrent_agents: usize,
    pub pool_max_instances_per_type: usize,
    pub pool_error_eviction_threshold: u32,
    pub pool_idle_timeout_secs: u64,
    pub lock_duration_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub log_level: Option<String>,
    pub use_llm_classifier: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {message}")]
    ReadFile { path: PathBuf, message: String },
    #[error("could not parse config file `{path}`: {message}")]
    ParseFile { path: PathBuf, message: String },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::OpenAi,
                api_key: None,
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            memory: MemoryConfig { ttl_secs: 7 * 24 * 60 * 60, history_limit: 50 },
            routing: RoutingConfig { use_llm_classifier: true },
            orchestration: OrchestrationConfig {
                max_tool_dispatches: 5,
                duplicate_window: 6,
                max_concurrent_agents: 5,
                pool_max_instances_per_type: 3,
                pool_error_eviction_threshold: 5,
                pool_idle_timeout_secs: 600,
                lock_duration_ms: 5_000,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("concierge.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(api_key.into());
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(memory) = patch.memory {
            if let Some(ttl_secs) = memory.ttl_secs {
                self.memory.ttl_secs = ttl_secs;
            }
            if let Some(history_limit) = memory.history_limit {
                self.memory.history_limit = history_limit;
            }
        }

        if let Some(routing) = patch.routing {
            if let Some(use_llm_classifier) = routing.use_llm_classifier {
                self.routing.use_llm_classifier = use_llm_classifier;
            }
        }

        if let Some(orchestration) = patch.orchestration {
            if let Some(max_tool_dispatches) = orchestration.max_tool_dispatches {
                self.orchestration.max_tool_dispatches = max_tool_dispatches;
            }
            if let Some(duplicate_window) = orchestration.duplicate_window {
                self.orchestration.duplicate_window = duplicate_window;
            }
            if let Some(max_concurrent_agents) = orchestration.max_concurrent_agents {
                self.orchestration.max_concurrent_agents = max_concurrent_agents;
            }
            if let Some(pool_max) = orchestration.pool_max_instances_per_type {
                self.orchestration.pool_max_instances_per_type = pool_max;
            }
            if let Some(threshold) = orchestration.pool_error_eviction_threshold {
                self.orchestration.pool_error_eviction_threshold = threshold;
            }
            if let Some(idle_timeout) = orchestration.pool_idle_timeout_secs {
                self.orchestration.pool_idle_timeout_secs = idle_timeout;
            }
            if let Some(lock_duration_ms) = orchestration.lock_duration_ms {
                self.orchestration.lock_duration_ms = lock_duration_ms;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CONCIERGE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_API_KEY") {
            self.llm.api_key = Some(value.into());
        }
        if let Some(value) = read_env("CONCIERGE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CONCIERGE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("CONCIERGE_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_MEMORY_TTL_SECS") {
            self.memory.ttl_secs = parse_u64("CONCIERGE_MEMORY_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_MEMORY_HISTORY_LIMIT") {
            self.memory.history_limit =
                parse_u64("CONCIERGE_MEMORY_HISTORY_LIMIT", &value)? as usize;
        }
        if let Some(value) = read_env("CONCIERGE_USE_LLM_CLASSIFIER") {
            self.routing.use_llm_classifier = parse_bool("CONCIERGE_USE_LLM_CLASSIFIER", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("CONCIERGE_LOG_FORMAT") {
            self.logging.format = value.parse()?;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(provider) = overrides.llm_provider {
            self.llm.provider = provider;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(use_llm_classifier) = overrides.use_llm_classifier {
            self.routing.use_llm_classifier = use_llm_classifier;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Validation("llm model must not be empty".to_string()));
        }
        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::Validation("llm timeout must be positive".to_string()));
        }
        if self.orchestration.max_tool_dispatches == 0 {
            return Err(ConfigError::Validation(
                "max tool dispatches must be positive".to_string(),
            ));
        }
        if self.orchestration.max_concurrent_agents == 0 {
            return Err(ConfigError::Validation(
                "max concurrent agents must be positive".to_string(),
            ));
        }
        if self.orchestration.pool_max_instances_per_type == 0 {
            return Err(ConfigError::Validation(
                "pool must allow at least one instance per type".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    memory: Option<MemoryPatch>,
    routing: Option<RoutingPatch>,
    orchestration: Option<OrchestrationPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MemoryPatch {
    ttl_secs: Option<u64>,
    history_limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RoutingPatch {
    use_llm_classifier: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct OrchestrationPatch {
    max_tool_dispatches: Option<u32>,
    duplicate_window: Option<usize>,
    max_concurrent_agents: Option<usize>,
    pool_max_instances_per_type: Option<usize>,
    pool_error_eviction_threshold: Option<u32>,
    pool_idle_timeout_secs: Option<u64>,
    lock_duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    let default = PathBuf::from("concierge.toml");
    default.exists().then_some(default)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|error| ConfigError::ReadFile {
        path: path.to_path_buf(),
        message: error.to_string(),
    })?;
    toml::from_str(&raw).map_err(|error| ConfigError::ParseFile {
        path: path.to_path_buf(),
        message: error.to_string(),
    })
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidEnvOverride {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

//! Configuration models for promptgrid.
//!
//! Everything a run needs is parameterized here and loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chat completion endpoint
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Model and execution settings
    pub experiment: ExperimentConfig,

    /// Options forwarded to every chat completion request
    #[serde(default)]
    pub model_arguments: ModelArguments,

    /// Prompt lists (inline and/or file-backed)
    #[serde(default)]
    pub prompts: PromptsConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// OpenAI-compatible endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// API key; `${VAR}` placeholders are expanded
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key.
    /// Set to "" (and omit `api_key`) for unauthenticated local endpoints.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,

    /// Base URL, without the trailing `/chat/completions`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_api_key_env() -> Option<String> {
    Some("OPENAI_API_KEY".to_string())
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_timeout() -> u64 {
    120
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Experiment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Model to query (e.g. "gpt-4o-mini")
    pub model: String,

    /// Maximum requests in flight
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_concurrency() -> usize {
    4
}

/// Optional run tracking.
///
/// When enabled, the run is wrapped in a `telemetry` span carrying `name`
/// and every trial is logged at info level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_telemetry_name")]
    pub name: String,
}

fn default_telemetry_name() -> String {
    "System Prompt Experiment".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: default_telemetry_name(),
        }
    }
}

/// Model-invocation options.
///
/// Recognized options are typed; anything else is kept in `extra` and sent
/// verbatim, so newer endpoint parameters need no code change. Unset options
/// are omitted from the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelArguments {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Unrecognized options, passed through as-is
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ModelArguments {
    /// Add an unrecognized option.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Prompt inputs.
///
/// Inline entries come first, followed by entries read from the files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsConfig {
    #[serde(default)]
    pub system_prompts: Vec<String>,

    #[serde(default)]
    pub human_messages: Vec<String>,

    /// JSONL file of system prompts
    #[serde(default)]
    pub system_prompts_file: Option<PathBuf>,

    /// JSONL file of user messages
    #[serde(default)]
    pub human_messages_file: Option<PathBuf>,
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// JSONL results file
    #[serde(default = "default_output_path")]
    pub path: PathBuf,

    /// Whether failed trials are written alongside successful ones
    #[serde(default = "default_true")]
    pub include_failed: bool,
}

fn default_output_path() -> PathBuf {
    PathBuf::from("results.jsonl")
}

fn default_true() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            include_failed: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_owned(),
                source,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.experiment.model.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "experiment.model must not be empty".to_string(),
            ));
        }
        if self.experiment.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "experiment.concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the API key from config or environment.
    ///
    /// `Ok(None)` means the endpoint is configured without authentication.
    pub fn resolve_api_key(&self) -> Result<Option<String>, ConfigError> {
        if let Some(key) = &self.endpoint.api_key {
            return Ok(Some(expand_env_vars(key)));
        }

        match self.endpoint.api_key_env.as_deref() {
            Some(env_var) if !env_var.is_empty() => std::env::var(env_var).map(Some).map_err(|_| {
                ConfigError::MissingApiKey {
                    env_var: env_var.to_string(),
                }
            }),
            _ => Ok(None),
        }
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return s.to_string();
    };

    re.replace_all(s, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| cap[0].to_string())
    })
    .into_owned()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key: set {env_var} env var or endpoint.api_key in config")]
    MissingApiKey { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "dirpilot.toml";
pub const DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub credential: CredentialConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct RemoteConfig {
    pub base_url: String,
    pub read_timeout_secs: u64,
    pub simple_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CredentialConfig {
    pub scopes: Vec<String>,
    pub expiry_margin_secs: u64,
    pub token_endpoint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub access_token: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub confidence_threshold: f64,
    pub turn_timeout_secs: u64,
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
    AzureOpenAi,
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
    pub remote_base_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub access_token: Option<String>,
    pub confidence_threshold: Option<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig {
                base_url: "http://localhost:5156".to_string(),
                read_timeout_secs: 30,
                simple_timeout_secs: 10,
            },
            credential: CredentialConfig {
                scopes: vec![DEFAULT_SCOPE.to_string()],
                expiry_margin_secs: 300,
                token_endpoint: None,
                client_id: None,
                client_secret: None,
                access_token: None,
                refresh_token: None,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
            },
            agent: AgentConfig { confidence_threshold: 0.7, turn_timeout_secs: 90 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::AzureOpenAi => "azure_openai",
            Self::Ollama => "ollama",
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "azure_openai" | "azure" => Ok(Self::AzureOpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|azure_openai|ollama)"
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
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(remote) = patch.remote {
            if let Some(base_url) = remote.base_url {
                self.remote.base_url = base_url;
            }
            if let Some(read_timeout_secs) = remote.read_timeout_secs {
                self.remote.read_timeout_secs = read_timeout_secs;
            }
            if let Some(simple_timeout_secs) = remote.simple_timeout_secs {
                self.remote.simple_timeout_secs = simple_timeout_secs;
            }
        }

        if let Some(credential) = patch.credential {
            if let Some(scopes) = credential.scopes {
                self.credential.scopes = scopes;
            }
            if let Some(expiry_margin_secs) = credential.expiry_margin_secs {
                self.credential.expiry_margin_secs = expiry_margin_secs;
            }
            if let Some(token_endpoint) = credential.token_endpoint {
                self.credential.token_endpoint = Some(token_endpoint);
            }
            if let Some(client_id) = credential.client_id {
                self.credential.client_id = Some(client_id);
            }
            if let Some(client_secret_value) = credential.client_secret {
                self.credential.client_secret = Some(secret_value(client_secret_value));
            }
            if let Some(access_token_value) = credential.access_token {
                self.credential.access_token = Some(secret_value(access_token_value));
            }
            if let Some(refresh_token_value) = credential.refresh_token {
                self.credential.refresh_token = Some(secret_value(refresh_token_value));
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(confidence_threshold) = agent.confidence_threshold {
                self.agent.confidence_threshold = confidence_threshold;
            }
            if let Some(turn_timeout_secs) = agent.turn_timeout_secs {
                self.agent.turn_timeout_secs = turn_timeout_secs;
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
        if let Some(value) = read_env("DIRPILOT_REMOTE_BASE_URL") {
            self.remote.base_url = value;
        }
        if let Some(value) = read_env("DIRPILOT_REMOTE_READ_TIMEOUT_SECS") {
            self.remote.read_timeout_secs = parse_u64("DIRPILOT_REMOTE_READ_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("DIRPILOT_REMOTE_SIMPLE_TIMEOUT_SECS") {
            self.remote.simple_timeout_secs =
                parse_u64("DIRPILOT_REMOTE_SIMPLE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("DIRPILOT_CREDENTIAL_SCOPES") {
            self.credential.scopes = parse_list(&value);
        }
        if let Some(value) = read_env("DIRPILOT_CREDENTIAL_EXPIRY_MARGIN_SECS") {
            self.credential.expiry_margin_secs =
                parse_u64("DIRPILOT_CREDENTIAL_EXPIRY_MARGIN_SECS", &value)?;
        }
        if let Some(value) = read_env("DIRPILOT_CREDENTIAL_TOKEN_ENDPOINT") {
            self.credential.token_endpoint = Some(value);
        }
        if let Some(value) = read_env("DIRPILOT_CREDENTIAL_CLIENT_ID") {
            self.credential.client_id = Some(value);
        }
        if let Some(value) = read_env("DIRPILOT_CREDENTIAL_CLIENT_SECRET") {
            self.credential.client_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("DIRPILOT_CREDENTIAL_ACCESS_TOKEN") {
            self.credential.access_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("DIRPILOT_CREDENTIAL_REFRESH_TOKEN") {
            self.credential.refresh_token = Some(secret_value(value));
        }

        if let Some(value) = read_env("DIRPILOT_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("DIRPILOT_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("DIRPILOT_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("DIRPILOT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("DIRPILOT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("DIRPILOT_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("DIRPILOT_AGENT_CONFIDENCE_THRESHOLD") {
            self.agent.confidence_threshold =
                parse_f64("DIRPILOT_AGENT_CONFIDENCE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("DIRPILOT_AGENT_TURN_TIMEOUT_SECS") {
            self.agent.turn_timeout_secs = parse_u64("DIRPILOT_AGENT_TURN_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("DIRPILOT_LOGGING_LEVEL").or_else(|| read_env("DIRPILOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("DIRPILOT_LOGGING_FORMAT").or_else(|| read_env("DIRPILOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(remote_base_url) = overrides.remote_base_url {
            self.remote.base_url = remote_base_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(access_token) = overrides.access_token {
            self.credential.access_token = Some(secret_value(access_token));
        }
        if let Some(confidence_threshold) = overrides.confidence_threshold {
            self.agent.confidence_threshold = confidence_threshold;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_remote(&self.remote)?;
        validate_credential(&self.credential)?;
        validate_llm(&self.llm)?;
        validate_agent(&self.agent)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let value = value.trim();
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ConfigError::Validation(format!("{field} must start with http:// or https://")));
    }
    Ok(())
}

fn validate_remote(remote: &RemoteConfig) -> Result<(), ConfigError> {
    validate_http_url("remote.base_url", &remote.base_url)?;

    if remote.read_timeout_secs == 0 || remote.read_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "remote.read_timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if remote.simple_timeout_secs == 0 || remote.simple_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "remote.simple_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_credential(credential: &CredentialConfig) -> Result<(), ConfigError> {
    if credential.scopes.iter().all(|scope| scope.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "credential.scopes must name at least one scope, \
             e.g. `https://graph.microsoft.com/.default`"
                .to_string(),
        ));
    }

    if credential.expiry_margin_secs > 3600 {
        return Err(ConfigError::Validation(
            "credential.expiry_margin_secs must be at most 3600".to_string(),
        ));
    }

    if let Some(endpoint) = &credential.token_endpoint {
        validate_http_url("credential.token_endpoint", endpoint)?;
        if credential.client_id.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true) {
            return Err(ConfigError::Validation(
                "credential.client_id is required when credential.token_endpoint is set"
                    .to_string(),
            ));
        }
    }

    let has_refresh = credential
        .refresh_token
        .as_ref()
        .is_some_and(|value| !value.expose_secret().trim().is_empty());
    if has_refresh && credential.token_endpoint.is_none() {
        return Err(ConfigError::Validation(
            "credential.refresh_token needs credential.token_endpoint to redeem it".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::AzureOpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/azure_openai providers".to_string(),
                ));
            }
            if llm.provider == LlmProvider::AzureOpenAi && llm.base_url.is_none() {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for azure_openai (the resource endpoint)".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    if let Some(base_url) = &llm.base_url {
        validate_http_url("llm.base_url", base_url)?;
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&agent.confidence_threshold) {
        return Err(ConfigError::Validation(
            "agent.confidence_threshold must be in range 0.0..=1.0".to_string(),
        ));
    }
    if agent.turn_timeout_secs == 0 || agent.turn_timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "agent.turn_timeout_secs must be in range 1..=600".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split([',', ' '])
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.trim().parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    remote: Option<RemotePatch>,
    credential: Option<CredentialPatch>,
    llm: Option<LlmPatch>,
    agent: Option<AgentPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct RemotePatch {
    base_url: Option<String>,
    read_timeout_secs: Option<u64>,
    simple_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CredentialPatch {
    scopes: Option<Vec<String>>,
    expiry_margin_secs: Option<u64>,
    token_endpoint: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    confidence_threshold: Option<f64>,
    turn_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

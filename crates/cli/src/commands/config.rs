use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dirpilot_core::config::{AppConfig, ConfigOverrides, LoadOptions, DEFAULT_CONFIG_FILE};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Field {
    key: &'static str,
    env_keys: &'static [&'static str],
    flag: Option<&'static str>,
    value: String,
}

impl Field {
    fn new(key: &'static str, env_keys: &'static [&'static str], value: impl Into<String>) -> Self {
        Self { key, env_keys, flag: None, value: value.into() }
    }

    fn with_flag(mut self, flag: &'static str) -> Self {
        self.flag = Some(flag);
        self
    }
}

pub fn run(options: LoadOptions) -> String {
    let config_file_path = match &options.config_path {
        Some(path) => path.exists().then(|| path.clone()),
        None => detect_config_path(),
    };
    let flags = active_flags(&options.overrides);

    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let header = "effective config (source precedence: flag > env > file > default):";
    let mut lines = vec![header.to_string()];
    for field in fields(&config) {
        let source =
            field_source(&field, &flags, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let remote = &config.remote;
    let credential = &config.credential;
    let llm = &config.llm;
    vec![
        Field::new("remote.base_url", &["DIRPILOT_REMOTE_BASE_URL"], remote.base_url.as_str())
            .with_flag("--base-url"),
        Field::new(
            "remote.read_timeout_secs",
            &["DIRPILOT_REMOTE_READ_TIMEOUT_SECS"],
            remote.read_timeout_secs.to_string(),
        ),
        Field::new(
            "remote.simple_timeout_secs",
            &["DIRPILOT_REMOTE_SIMPLE_TIMEOUT_SECS"],
            remote.simple_timeout_secs.to_string(),
        ),
        Field::new(
            "credential.scopes",
            &["DIRPILOT_CREDENTIAL_SCOPES"],
            credential.scopes.join(" "),
        ),
        Field::new(
            "credential.expiry_margin_secs",
            &["DIRPILOT_CREDENTIAL_EXPIRY_MARGIN_SECS"],
            credential.expiry_margin_secs.to_string(),
        ),
        Field::new(
            "credential.token_endpoint",
            &["DIRPILOT_CREDENTIAL_TOKEN_ENDPOINT"],
            credential.token_endpoint.as_deref().unwrap_or("<unset>"),
        ),
        Field::new(
            "credential.client_id",
            &["DIRPILOT_CREDENTIAL_CLIENT_ID"],
            credential.client_id.as_deref().unwrap_or("<unset>"),
        ),
        Field::new(
            "credential.client_secret",
            &["DIRPILOT_CREDENTIAL_CLIENT_SECRET"],
            redact(credential.client_secret.as_ref()),
        ),
        Field::new(
            "credential.access_token",
            &["DIRPILOT_CREDENTIAL_ACCESS_TOKEN"],
            redact(credential.access_token.as_ref()),
        )
        .with_flag("--access-token"),
        Field::new(
            "credential.refresh_token",
            &["DIRPILOT_CREDENTIAL_REFRESH_TOKEN"],
            redact(credential.refresh_token.as_ref()),
        ),
        Field::new("llm.provider", &["DIRPILOT_LLM_PROVIDER"], llm.provider.as_str())
            .with_flag("--provider"),
        Field::new("llm.model", &["DIRPILOT_LLM_MODEL"], llm.model.as_str()).with_flag("--model"),
        Field::new(
            "llm.base_url",
            &["DIRPILOT_LLM_BASE_URL"],
            llm.base_url.as_deref().unwrap_or("<unset>"),
        ),
        Field::new("llm.api_key", &["DIRPILOT_LLM_API_KEY"], redact(llm.api_key.as_ref())),
        Field::new(
            "llm.timeout_secs",
            &["DIRPILOT_LLM_TIMEOUT_SECS"],
            llm.timeout_secs.to_string(),
        ),
        Field::new(
            "agent.confidence_threshold",
            &["DIRPILOT_AGENT_CONFIDENCE_THRESHOLD"],
            config.agent.confidence_threshold.to_string(),
        )
        .with_flag("--confidence-threshold"),
        Field::new(
            "agent.turn_timeout_secs",
            &["DIRPILOT_AGENT_TURN_TIMEOUT_SECS"],
            config.agent.turn_timeout_secs.to_string(),
        ),
        Field::new(
            "logging.level",
            &["DIRPILOT_LOGGING_LEVEL", "DIRPILOT_LOG_LEVEL"],
            config.logging.level.as_str(),
        )
        .with_flag("--log-level"),
        Field::new(
            "logging.format",
            &["DIRPILOT_LOGGING_FORMAT", "DIRPILOT_LOG_FORMAT"],
            format!("{:?}", config.logging.format).to_lowercase(),
        ),
    ]
}

fn active_flags(overrides: &ConfigOverrides) -> Vec<&'static str> {
    [
        (overrides.remote_base_url.is_some(), "--base-url"),
        (overrides.log_level.is_some(), "--log-level"),
        (overrides.llm_provider.is_some(), "--provider"),
        (overrides.llm_model.is_some(), "--model"),
        (overrides.access_token.is_some(), "--access-token"),
        (overrides.confidence_threshold.is_some(), "--confidence-threshold"),
    ]
    .into_iter()
    .filter_map(|(active, flag)| active.then_some(flag))
    .collect()
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    field: &Field,
    flags: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(flag) = field.flag.filter(|flag| flags.contains(flag)) {
        return format!("flag ({flag})");
    }

    if let Some(env_key) = field.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, field.key) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact(secret: Option<&SecretString>) -> String {
    match secret.map(|secret| secret.expose_secret().trim().len()) {
        None => "<unset>".to_string(),
        Some(0) => "<empty>".to_string(),
        Some(len) => format!("<redacted, {len} chars>"),
    }
}

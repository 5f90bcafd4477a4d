use std::sync::Arc;
use std::time::Duration;

use dirpilot_agent::{AgentRuntime, RuntimeSettings};
use dirpilot_client::{
    AuthSession, CredentialProvider, HttpCompletionClient, InvokerError, OAuthRefreshTokenSource,
    RemoteInvoker, StaticTokenSource, TokenError, TokenSource, UserContext,
};
use dirpilot_core::config::{AppConfig, ConfigError, CredentialConfig, LoadOptions, LoggingConfig};
use dirpilot_core::{CompletionClient, CompletionError, ToolCatalog};
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

const TOKEN_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("completion client setup failed: {0}")]
    Completion(#[from] CompletionError),
    #[error("remote invoker setup failed: {0}")]
    Invoker(#[from] InvokerError),
    #[error("credential source setup failed: {0}")]
    TokenSource(#[from] TokenError),
}

pub struct Application {
    pub config: AppConfig,
    pub runtime: AgentRuntime,
}

pub fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config)
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let completion: Arc<dyn CompletionClient> =
        Arc::new(HttpCompletionClient::from_config(&config.llm)?);
    let runtime = build_runtime(&config, completion)?;
    info!(
        event_name = "system.bootstrap.ready",
        remote_base_url = %config.remote.base_url,
        llm_provider = config.llm.provider.as_str(),
        llm_model = %config.llm.model,
        signed_in = has_session_material(&config.credential),
        "runtime assembled"
    );
    Ok(Application { config, runtime })
}

/// Wires the runtime around a caller-supplied completion client.
pub fn build_runtime(
    config: &AppConfig,
    completion: Arc<dyn CompletionClient>,
) -> Result<AgentRuntime, BootstrapError> {
    let credentials = credential_provider(&config.credential)?;
    let invoker = RemoteInvoker::from_config(&config.remote)?;
    let settings = RuntimeSettings::from_config(&config.agent);
    let factory = session_factory(&config.credential);
    let catalog = Arc::new(ToolCatalog::builtin());

    Ok(AgentRuntime::new(catalog, completion, credentials, invoker, settings)
        .with_session_factory(factory))
}

pub fn credential_provider(config: &CredentialConfig) -> Result<CredentialProvider, TokenError> {
    Ok(CredentialProvider::from_config(token_source(config)?, config))
}

/// A refresh grant when a token endpoint is configured, otherwise the
/// configured session token. Without either, sessions start signed out and
/// the source is never consulted.
pub fn token_source(config: &CredentialConfig) -> Result<Arc<dyn TokenSource>, TokenError> {
    if let Some(endpoint) = &config.token_endpoint {
        let client_id = config.client_id.clone().unwrap_or_default();
        let client_secret = config.client_secret.clone();
        let timeout = TOKEN_ENDPOINT_TIMEOUT;
        let source = OAuthRefreshTokenSource::new(endpoint, client_id, client_secret, timeout)?;
        return Ok(Arc::new(source));
    }

    let token = config
        .access_token
        .as_ref()
        .map(|token| token.expose_secret().to_string())
        .unwrap_or_default();
    Ok(Arc::new(StaticTokenSource::new(token)))
}

pub fn session_factory(
    config: &CredentialConfig,
) -> impl Fn() -> AuthSession + Send + Sync + 'static {
    let signed_in = has_session_material(config);
    let access_token = config.access_token.as_ref().map(|token| token.expose_secret().to_string());
    let refresh_token = config.refresh_token.clone();

    move || {
        if !signed_in {
            return AuthSession::signed_out();
        }
        let user =
            UserContext { user_id: None, login_hint: None, refresh_token: refresh_token.clone() };
        AuthSession::signed_in(user, access_token.clone())
    }
}

fn has_session_material(config: &CredentialConfig) -> bool {
    config.access_token.is_some() || config.refresh_token.is_some()
}

/// Logs go to stderr; stdout carries replies and command output.
pub fn init_logging(config: &LoggingConfig) {
    use dirpilot_core::config::LogFormat::*;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let _ = match config.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use dirpilot_core::config::CredentialConfig;
    use secrecy::SecretString;

    use super::{session_factory, token_source};

    fn credential(access_token: Option<&str>, refresh_token: Option<&str>) -> CredentialConfig {
        CredentialConfig {
            scopes: vec!["api://dirpilot/.default".to_string()],
            expiry_margin_secs: 300,
            token_endpoint: None,
            client_id: None,
            client_secret: None,
            access_token: access_token.map(|token| SecretString::from(token.to_string())),
            refresh_token: refresh_token.map(|token| SecretString::from(token.to_string())),
        }
    }

    #[test]
    fn sessions_start_signed_out_without_session_material() {
        let factory = session_factory(&credential(None, None));
        assert!(!factory().is_signed_in());
    }

    #[test]
    fn configured_token_signs_sessions_in() {
        let factory = session_factory(&credential(Some("access"), None));
        let session = factory();

        assert!(session.is_signed_in());
        assert!(session.has_cached_token());
    }

    #[test]
    fn refresh_token_alone_signs_sessions_in_without_cached_token() {
        let factory = session_factory(&credential(None, Some("refresh")));
        let session = factory();

        assert!(session.is_signed_in());
        assert!(!session.has_cached_token());
        assert!(session.user().refresh_token.is_some());
    }

    #[test]
    fn token_endpoint_selects_refresh_grant_source() {
        let mut config = credential(None, Some("refresh"));
        config.token_endpoint = Some("https://login.example.com/oauth2/v2.0/token".to_string());
        config.client_id = Some("client-123".to_string());

        assert!(token_source(&config).is_ok());
    }
}

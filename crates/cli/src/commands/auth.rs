use dirpilot_core::config::{AppConfig, LoadOptions};

use crate::bootstrap::{credential_provider, session_factory};
use crate::commands::{CommandResult, EXIT_BOOTSTRAP, EXIT_CONFIG};

/// Reports what a new session would see, without contacting any endpoint.
pub fn run(options: LoadOptions) -> CommandResult {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            let message = error.to_string();
            return CommandResult::failure("auth", "config_validation", message, EXIT_CONFIG);
        }
    };

    let provider = match credential_provider(&config.credential) {
        Ok(provider) => provider,
        Err(error) => {
            let message = error.to_string();
            return CommandResult::failure("auth", "credential_source", message, EXIT_BOOTSTRAP);
        }
    };

    let session = session_factory(&config.credential)();
    let status = provider.status(&session);
    let scopes = provider.scopes().join(" ");
    CommandResult::success("auth", format!("{}: {status} (scopes: {scopes})", status.as_str()))
}

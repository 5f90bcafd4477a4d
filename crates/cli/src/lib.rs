pub mod bootstrap;
pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dirpilot_core::config::{AppConfig, ConfigOverrides, LlmProvider, LoadOptions};

#[derive(Debug, Parser)]
#[command(
    name = "dirpilot",
    about = "Dirpilot directory agent CLI",
    long_about = "Chat with the directory agent, run single requests, and inspect the tool \
                  catalog, configuration and sign-in state.",
    after_help = "Examples:\n  dirpilot chat\n  dirpilot ask \"Get all users\"\
                  \n  dirpilot tools\n  dirpilot config --base-url http://localhost:5156"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a dirpilot.toml config file")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override remote.base_url")]
    base_url: Option<String>,
    #[arg(long, global = true, help = "Override logging.level")]
    log_level: Option<String>,
    #[arg(
        long,
        global = true,
        value_parser = parse_provider,
        help = "Override llm.provider (openai|azure_openai|ollama)"
    )]
    provider: Option<LlmProvider>,
    #[arg(long, global = true, help = "Override llm.model")]
    model: Option<String>,
    #[arg(long, global = true, help = "Session bearer token (overrides credential.access_token)")]
    access_token: Option<String>,
    #[arg(long, global = true, help = "Override agent.confidence_threshold")]
    confidence_threshold: Option<f64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Interactive chat on stdin (/reset, /count, /auth, /signout, /quit)")]
    Chat {
        #[arg(long, default_value = "cli", help = "Session identifier")]
        session: String,
    },
    #[command(about = "Send one request on a fresh session and print the reply as JSON")]
    Ask {
        #[arg(required = true, num_args = 1.., help = "The request, e.g. \"Get all users\"")]
        utterance: Vec<String>,
    },
    #[command(about = "Print the tool catalog as JSON")]
    Tools,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Show the credential status a new session would start with")]
    Auth,
}

fn parse_provider(raw: &str) -> Result<LlmProvider, String> {
    raw.parse::<LlmProvider>().map_err(|error| error.to_string())
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides {
                remote_base_url: self.base_url.clone(),
                log_level: self.log_level.clone(),
                llm_provider: self.provider,
                llm_model: self.model.clone(),
                access_token: self.access_token.clone(),
                confidence_threshold: self.confidence_threshold,
            },
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.load_options();

    if let Ok(config) = AppConfig::load(options.clone()) {
        bootstrap::init_logging(&config.logging);
    }

    let result = match cli.command {
        Command::Chat { session } => commands::chat::run(options, &session),
        Command::Ask { utterance } => commands::ask::run(options, &utterance.join(" ")),
        Command::Tools => commands::tools::run(),
        Command::Config => commands::CommandResult::raw(commands::config::run(options)),
        Command::Auth => commands::auth::run(options),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use dirpilot_core::config::LlmProvider;

    use super::{Cli, Command};

    #[test]
    fn ask_joins_words_and_collects_overrides() {
        let cli = Cli::parse_from([
            "dirpilot",
            "ask",
            "Get",
            "all",
            "users",
            "--base-url",
            "http://directory:5156",
            "--provider",
            "openai",
        ]);

        let options = cli.load_options();
        assert_eq!(options.overrides.remote_base_url.as_deref(), Some("http://directory:5156"));
        assert_eq!(options.overrides.llm_provider, Some(LlmProvider::OpenAi));
        assert!(!options.require_file);
        match cli.command {
            Command::Ask { utterance } => assert_eq!(utterance.join(" "), "Get all users"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn explicit_config_path_is_required_to_exist() {
        let cli = Cli::parse_from(["dirpilot", "--config", "ops/dirpilot.toml", "tools"]);
        let options = cli.load_options();

        assert!(options.require_file);
        assert_eq!(options.config_path.as_deref(), Some(std::path::Path::new("ops/dirpilot.toml")));
    }

    #[test]
    fn unknown_provider_is_rejected_at_parse_time() {
        assert!(Cli::try_parse_from(["dirpilot", "--provider", "bard", "tools"]).is_err());
    }
}

use dirpilot_agent::AgentRuntime;
use dirpilot_core::config::LoadOptions;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::bootstrap::{bootstrap, BootstrapError};
use crate::commands::{
    current_thread_runtime, CommandResult, EXIT_BOOTSTRAP, EXIT_CONFIG, EXIT_RUNTIME,
};

const BANNER: &str = "dirpilot chat. Type /help for commands, /quit to leave.\n";
const HELP: &str = "/reset    start the conversation over\n\
/count    number of messages in this conversation\n\
/auth     show the sign-in status\n\
/signout  drop the session's tokens\n\
/quit     leave";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplCommand {
    Reset,
    Count,
    Auth,
    SignOut,
    Help,
    Quit,
    Unknown(String),
}

impl ReplCommand {
    /// `None` for ordinary chat input.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('/') {
            return None;
        }
        let command = match line.to_ascii_lowercase().as_str() {
            "/reset" => Self::Reset,
            "/count" => Self::Count,
            "/auth" => Self::Auth,
            "/signout" | "/logout" => Self::SignOut,
            "/help" | "/?" => Self::Help,
            "/quit" | "/exit" => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        };
        Some(command)
    }
}

pub fn run(options: LoadOptions, session_id: &str) -> CommandResult {
    let app = match bootstrap(options) {
        Ok(app) => app,
        Err(BootstrapError::Config(error)) => {
            let message = error.to_string();
            return CommandResult::failure("chat", "config_validation", message, EXIT_CONFIG);
        }
        Err(error) => {
            return CommandResult::failure("chat", "bootstrap", error.to_string(), EXIT_BOOTSTRAP)
        }
    };

    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            let message = format!("{error:#}");
            return CommandResult::failure("chat", "async_runtime", message, EXIT_RUNTIME);
        }
    };

    let stdin = BufReader::new(tokio::io::stdin());
    let outcome =
        runtime.block_on(converse(&app.runtime, session_id, stdin, tokio::io::stdout()));
    app.runtime.close_session(session_id);

    match outcome {
        Ok(turns) => {
            let summary = format!("session `{session_id}` closed after {turns} turns");
            CommandResult::success("chat", summary)
        }
        Err(error) => CommandResult::failure("chat", "io", error.to_string(), EXIT_RUNTIME),
    }
}

/// Reads lines until `/quit` or end of input. Returns the number of turns
/// sent to the agent.
pub async fn converse<R, W>(
    runtime: &AgentRuntime,
    session_id: &str,
    input: R,
    mut output: W,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut turns = 0;
    output.write_all(BANNER.as_bytes()).await?;

    loop {
        output.write_all(b"> ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        let reply = match ReplCommand::parse(line) {
            Some(ReplCommand::Quit) => break,
            Some(ReplCommand::Reset) => {
                runtime.reset(session_id).await;
                "Conversation reset.".to_string()
            }
            Some(ReplCommand::Count) => {
                let count = runtime.message_count(session_id).await;
                format!("{count} messages in this conversation.")
            }
            Some(ReplCommand::Auth) => runtime.auth_status(session_id).await.to_string(),
            Some(ReplCommand::SignOut) => {
                runtime.sign_out(session_id).await;
                "Signed out.".to_string()
            }
            Some(ReplCommand::Help) => HELP.to_string(),
            Some(ReplCommand::Unknown(command)) => {
                format!("Unknown command `{command}`. Type /help for commands.")
            }
            None if line.is_empty() => continue,
            None => {
                turns += 1;
                runtime.respond(session_id, line).await
            }
        };

        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
    }

    output.flush().await?;
    Ok(turns)
}

#[cfg(test)]
mod tests {
    use super::ReplCommand;

    #[test]
    fn slash_commands_are_case_insensitive() {
        assert_eq!(ReplCommand::parse("/RESET"), Some(ReplCommand::Reset));
        assert_eq!(ReplCommand::parse("  /count "), Some(ReplCommand::Count));
        assert_eq!(ReplCommand::parse("/exit"), Some(ReplCommand::Quit));
        assert_eq!(
            ReplCommand::parse("/bogus"),
            Some(ReplCommand::Unknown("/bogus".to_string()))
        );
    }

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(ReplCommand::parse("get all users"), None);
        assert_eq!(ReplCommand::parse(""), None);
    }
}

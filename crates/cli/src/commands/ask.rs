use dirpilot_core::config::LoadOptions;
use uuid::Uuid;

use crate::bootstrap::{bootstrap, BootstrapError};
use crate::commands::{
    current_thread_runtime, CommandResult, EXIT_BOOTSTRAP, EXIT_CONFIG, EXIT_RUNTIME,
};

/// One turn on a fresh session; the reply is the envelope message.
pub fn run(options: LoadOptions, utterance: &str) -> CommandResult {
    let app = match bootstrap(options) {
        Ok(app) => app,
        Err(BootstrapError::Config(error)) => {
            let message = error.to_string();
            return CommandResult::failure("ask", "config_validation", message, EXIT_CONFIG);
        }
        Err(error) => {
            return CommandResult::failure("ask", "bootstrap", error.to_string(), EXIT_BOOTSTRAP)
        }
    };

    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            let message = format!("{error:#}");
            return CommandResult::failure("ask", "async_runtime", message, EXIT_RUNTIME);
        }
    };

    let session_id = format!("ask-{}", Uuid::new_v4());
    let reply = runtime.block_on(app.runtime.respond(&session_id, utterance));
    app.runtime.close_session(&session_id);
    CommandResult::success("ask", reply)
}

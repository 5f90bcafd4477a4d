use std::process::ExitCode;

fn main() -> ExitCode {
    dirpilot_cli::run()
}

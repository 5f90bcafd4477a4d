use dirpilot_core::ToolCatalog;

use crate::commands::CommandResult;

pub fn run() -> CommandResult {
    let catalog = ToolCatalog::builtin();
    match serde_json::to_string_pretty(catalog.all()) {
        Ok(listing) => CommandResult::raw(listing),
        Err(error) => CommandResult::failure("tools", "serialization", error.to_string(), 1),
    }
}

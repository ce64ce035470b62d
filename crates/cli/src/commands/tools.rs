use std::path::Path;

use leadline_core::catalog::ToolCatalog;
use serde_json::json;

use crate::commands::{CommandResult, EXIT_CONFIG};

pub fn run(catalog_path: Option<&Path>) -> CommandResult {
    let catalog = match ToolCatalog::load(catalog_path) {
        Ok(catalog) => catalog,
        Err(error) => return CommandResult::failure("tools", "catalog", error.to_string(), EXIT_CONFIG),
    };

    let tools = catalog
        .iter()
        .map(|tool| json!({ "name": tool.name, "description": tool.description }))
        .collect::<Vec<_>>();

    CommandResult::report("tools", 0, json!({ "count": catalog.len(), "tools": tools }))
}

use std::collections::BTreeSet;

use anyhow::Context;
use leadline_core::catalog::ToolCatalog;
use leadline_crm::{McpClient, RemoteTool};
use serde_json::json;

use crate::commands::{block_on, load_config, CommandResult, EXIT_CONFIG, EXIT_FAILED};

pub fn run() -> CommandResult {
    let config = match load_config("discover") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let catalog = match ToolCatalog::load(config.gateway.catalog_path.as_deref()) {
        Ok(catalog) => catalog,
        Err(error) => {
            return CommandResult::failure("discover", "catalog", error.to_string(), EXIT_CONFIG)
        }
    };

    let remote = block_on("discover", async {
        let client = McpClient::from_config(&config.crm).context("could not build CRM client")?;
        client.list_tools().await.with_context(|| format!("tools/list against {} failed", client.endpoint()))
    });
    let remote: Vec<RemoteTool> = match remote {
        Ok(Ok(tools)) => tools,
        Ok(Err(error)) => {
            return CommandResult::failure("discover", "crm_unreachable", format!("{error:#}"), EXIT_FAILED)
        }
        Err(result) => return result,
    };

    let remote_names = remote.iter().map(|tool| tool.name.as_str()).collect::<BTreeSet<_>>();
    let local_names = catalog.names().collect::<BTreeSet<_>>();

    CommandResult::report(
        "discover",
        0,
        json!({
            "endpoint": config.crm.mcp_url,
            "count": remote.len(),
            "tools": remote,
            "not_in_catalog": remote_names.difference(&local_names).collect::<Vec<_>>(),
            "missing_remotely": local_names.difference(&remote_names).collect::<Vec<_>>(),
        }),
    )
}

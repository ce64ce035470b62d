pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "leadline",
    about = "Leadline operator CLI",
    long_about = "Inspect configuration, check readiness, and probe CRM tools outside the chat loop.",
    after_help = "Examples:\n  leadline doctor --json\n  leadline tools\n  leadline call contacts_get-contact --args '{\"path_contactId\":\"abc\"}'"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Print the effective configuration with source attribution and redaction")]
    Config,
    #[command(about = "Validate config, catalog loading, and rule/catalog consistency")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List the tools offered to the model")]
    Tools {
        #[arg(long, help = "Read the catalog from this JSON file instead of the built-in one")]
        catalog: Option<PathBuf>,
    },
    #[command(about = "List the tools the remote CRM endpoint advertises and diff them with the catalog")]
    Discover,
    #[command(about = "Resolve defaults, validate, and dispatch a single tool call")]
    Call {
        #[arg(help = "Catalog tool name, e.g. contacts_get-contact")]
        tool: String,
        #[arg(long, default_value = "{}", help = "Tool arguments as a JSON object")]
        args: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Tools { catalog } => commands::tools::run(catalog.as_deref()),
        Command::Discover => commands::discover::run(),
        Command::Call { tool, args } => commands::call::run(&tool, &args),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

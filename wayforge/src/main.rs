mod cli;
mod commands;
mod interaction;
mod tools;

use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wayforge_core::logging::init_from_env();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Init { workspace } => commands::init(workspace).await?,
        Commands::Plan { description, sprint, workspace } => commands::plan(description, sprint, workspace).await?,
        Commands::Build { sprint, parallel, max_parallel_tasks, yes, workspace } => {
            commands::build(sprint, parallel, max_parallel_tasks, yes, workspace).await?
        }
        Commands::Status { sprint, workspace } => commands::status(sprint, workspace).await?,
        Commands::Resume { sprint, parallel, yes, workspace } => commands::resume(sprint, parallel, yes, workspace).await?,
        Commands::Config { workspace } => commands::config(workspace)?,
        Commands::Chat { message } => commands::chat(message).await?,
    };

    std::process::exit(code);
}

mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{BackupCommand, Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone();

    match cli.command {
        Command::Serve => commands::serve(config_path).await,
        Command::Plan { target, mode } => commands::plan(config_path, target, mode.into()).await,
        Command::Run { target, mode, yes } => {
            commands::run(config_path, target, mode.into(), yes).await
        }
        Command::Status => commands::status(config_path).await,
        Command::Logs => commands::logs(config_path).await,
        Command::Playbook => commands::playbook(config_path).await,
        Command::History { r#type, status, limit } => {
            commands::history(config_path, r#type, status, limit).await
        }
        Command::Backup { command } => match command {
            BackupCommand::List => commands::backup_list(config_path).await,
            BackupCommand::Create => commands::backup_create(config_path).await,
            BackupCommand::Prune { retention } => {
                commands::backup_prune(config_path, retention).await
            }
            BackupCommand::Restore { path, yes } => {
                commands::backup_restore(config_path, path, yes).await
            }
        },
    }
}

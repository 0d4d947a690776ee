use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use updater_domain::UpgradeMode;

#[derive(Debug, Parser)]
#[command(
    name = "payram-updater",
    about = "On-host upgrade controller for the PayRam application container",
    version
)]
pub struct Cli {
    /// Optional settings file (YAML). Environment variables override it.
    #[arg(long, env = "PAYRAM_UPDATER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the control-plane API server.
    Serve,

    /// Validate an upgrade without changing anything.
    Plan {
        /// Target version, or "latest" to resolve through the policy.
        #[arg(long, default_value = "latest")]
        target: String,

        #[arg(long, value_enum, default_value = "manual")]
        mode: ModeArg,
    },

    /// Run an upgrade.
    Run {
        /// Target version, or "latest" to resolve through the policy.
        #[arg(long, default_value = "latest")]
        target: String,

        #[arg(long, value_enum, default_value = "manual")]
        mode: ModeArg,

        /// Skip the interactive confirmation.
        #[arg(long)]
        yes: bool,
    },

    /// Show the latest upgrade job.
    Status,

    /// Print the latest job's log.
    Logs,

    /// Print the recovery playbook for the last failure.
    Playbook,

    /// Show audit history events.
    History {
        /// Filter: upgrade, backup, or restore.
        #[arg(long, value_name = "TYPE")]
        r#type: Option<String>,

        /// Filter: started, succeeded, failed, or validated.
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// Database backup operations.
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum BackupCommand {
    /// List backups, newest first.
    List,

    /// Take a backup of the current database outside an upgrade.
    Create,

    /// Delete all but the N newest backups.
    Prune {
        /// Override the configured retention.
        #[arg(long)]
        retention: Option<u32>,
    },

    /// Restore a backup file into the database.
    Restore {
        path: PathBuf,

        /// Skip the interactive confirmation.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Dashboard,
    Manual,
}

impl From<ModeArg> for UpgradeMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Dashboard => UpgradeMode::Dashboard,
            ModeArg::Manual => UpgradeMode::Manual,
        }
    }
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "pgroll",
    about = "pgroll — rolling restarts for Postgres clusters",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to pgroll.toml (default: ~/.config/pgroll/pgroll.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Restart every member of a Postgres cluster, one node at a time.
    ///
    /// Leased clusters have every node leased before the first restart.
    /// The first failed node stops the run; later nodes are left alone.
    Restart {
        /// Name of the Postgres app
        app: String,
        /// Minimum HA image version (overrides [restart].min_version)
        #[arg(long)]
        min_version: Option<String>,
        /// Restart order: as-listed or leader-last
        #[arg(long)]
        order: Option<String>,
        /// Whole-run deadline in seconds
        #[arg(long)]
        deadline: Option<u64>,
        /// Output format for the final report
        #[arg(short, long, value_enum, default_value_t = commands::restart::ReportFormat::Text)]
        format: commands::restart::ReportFormat,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,pgroll=info"))?,
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Restart {
            app,
            min_version,
            order,
            deadline,
            format,
        } => {
            let overrides = commands::restart::Overrides {
                min_version,
                order,
                deadline,
            };
            commands::restart::restart(cli.config.as_deref(), &app, overrides, format).await
        }
    }
}

//! Vidify CLI - inspect pipeline configuration and run dry-run jobs.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use vidify_core::logging::{init_tracing, LogLevel};

mod commands;

use commands::config::ConfigCommand;
use commands::resolve::ResolveCommand;
use commands::run::RunCommand;
use commands::stages::StagesCommand;

#[derive(Parser)]
#[command(
    name = "vidify",
    version,
    about = "Vidify video processing pipeline",
    after_help = "EXAMPLES:\n  \
                  vidify resolve --variant premium\n  \
                  vidify stages --variant quick-preview\n  \
                  vidify run --variant children videos/a.mp4 videos/b.mp4\n  \
                  vidify config init"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file
    #[arg(long, global = true, default_value = ".config/settings.toml")]
    config: PathBuf,

    /// Log level (overrides the settings file; RUST_LOG wins over both)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration for a variant
    Resolve(ResolveCommand),

    /// List the enabled stages in execution order
    Stages(StagesCommand),

    /// Run jobs against a dry-run compute backend
    Run(RunCommand),

    /// Manage the settings file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config(cmd) = &cli.command {
        let _guard = init_tracing(cli.log_level.unwrap_or_default(), None);
        return cmd.execute(&cli.config);
    }

    let settings = commands::load_settings(&cli.config)?;
    let level = cli.log_level.unwrap_or(settings.logging.level);

    match cli.command {
        Commands::Resolve(cmd) => {
            let _guard = init_tracing(level, None);
            cmd.execute(&settings)
        }
        Commands::Stages(cmd) => {
            let _guard = init_tracing(level, None);
            cmd.execute(&settings)
        }
        Commands::Run(cmd) => {
            let logs = PathBuf::from(&settings.paths.logs_folder);
            let _guard = init_tracing(level, Some(&logs));
            tracing::info!("Vidify {} starting", vidify_core::version());
            cmd.execute(settings).await
        }
        Commands::Config(_) => Ok(()),
    }
}

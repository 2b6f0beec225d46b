use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

mod commands;
mod config;
mod fs_host;

use commands::boot::BootCommand;
use commands::resolve::ResolveCommand;

#[derive(Parser)]
#[command(name = "ferry", version, about = "Ferry dependency-aware script loader")]
struct Cli {
    /// Config file (defaults to the nearest ferry.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the URLs logical names resolve to
    Resolve(ResolveCommand),
    /// Run the bootstrap stages against files on disk
    Boot(BootCommand),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Resolve(cmd) => cmd.run(&config)?,
        Commands::Boot(cmd) => cmd.run(&config).await?,
    }

    Ok(())
}

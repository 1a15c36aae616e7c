mod config;
mod launcher;
mod ui;

use clap::{Parser, Subcommand};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = ui::app_name())]
#[command(about = ui::build_banner())]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the ingestion service
    Run {
        /// Path to config.toml file
        #[arg(short, long, default_value = "config.toml")]
        config: std::path::PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.commands {
        Commands::Version => ui::print_version(),
        Commands::Run { config } => {
            tools::setup_application(env!("CARGO_PKG_NAME"))?;
            launcher::start(config).await?;
        }
    }

    Ok(())
}

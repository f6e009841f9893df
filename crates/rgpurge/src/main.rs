mod commands;
mod output;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rgpurge")]
#[command(about = "Tear down an Azure resource group, blockers and all", long_about = None)]
struct Cli {
    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove every blocker, then delete the resource group
    Teardown(commands::teardown::TeardownArgs),
    /// List the blockers in a resource group without changing anything
    Scan(commands::scan::ScanArgs),
    /// Show version information
    Version,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Version) {
        println!("rgpurge {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Teardown(args) => commands::teardown::handle(args).await,
        Commands::Scan(args) => commands::scan::handle(args).await,
        Commands::Version => Ok(0),
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            2
        }
    };
    std::process::exit(code);
}

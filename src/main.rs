use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use datdash::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for datdash::AppCommand {
    fn from(cmd: Commands) -> datdash::AppCommand {
        match cmd {
            Commands::Dashboard { name, coin_price } => {
                datdash::AppCommand::Dashboard { name, coin_price }
            }
            Commands::List => datdash::AppCommand::List,
            Commands::RefreshPrices => datdash::AppCommand::RefreshPrices,
            Commands::RefreshHoldings => datdash::AppCommand::RefreshHoldings,
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Show returns, correlations and mNAV for a dashboard
    Dashboard {
        /// Dashboard name, defaults to the first configured
        #[arg(short, long)]
        name: Option<String>,

        /// Coin price in USD to value holdings at instead of the snapshot price
        #[arg(long)]
        coin_price: Option<f64>,
    },
    /// List configured dashboards
    List,
    /// Append the last 59 days of hourly prices to the history store
    RefreshPrices,
    /// Rebuild the treasury holdings snapshot
    RefreshHoldings,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => datdash::cli::setup::setup_at_path(path),
            None => datdash::cli::setup::setup(),
        },
        Some(cmd) => datdash::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}

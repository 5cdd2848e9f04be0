use anyhow::Result;
use clap::{ArgGroup, Args, CommandFactory, Parser, Subcommand};
use holdsnap::core::log::init_logging;
use holdsnap::{AppCommand, ValidateArgs};

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

#[derive(Args)]
#[command(group(ArgGroup::new("target").required(true).args(["group_id", "category_id"])))]
struct ValidateCommand {
    /// Instrument code, e.g. AAPL or BTC
    #[arg(long)]
    code: String,
    /// Display name of the holding
    #[arg(long)]
    name: String,
    #[arg(long)]
    group_id: Option<String>,
    #[arg(long)]
    category_id: Option<String>,
    /// Label used to pick the price source when validating by category
    #[arg(long, requires = "category_id")]
    group_name: Option<String>,
    #[arg(long)]
    quantity: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Serve the HTTP API and run scheduled valuations
    Serve,
    /// Run one valuation cycle now
    Run,
    /// Check whether a holding can be priced
    Validate(ValidateCommand),
    /// List price sources and check how labels resolve
    Sources {
        /// Group or category names to resolve
        labels: Vec<String>,
    },
    /// Display holdings with their latest earnings
    Holdings,
    /// Display the snapshot history of a holding
    History {
        holding_id: String,
    },
}

impl From<Commands> for AppCommand {
    fn from(cmd: Commands) -> AppCommand {
        match cmd {
            Commands::Serve => AppCommand::Serve,
            Commands::Run => AppCommand::Run,
            Commands::Validate(args) => AppCommand::Validate(ValidateArgs {
                name: args.name,
                code: args.code,
                group_id: args.group_id,
                category_id: args.category_id,
                group_name: args.group_name,
                quantity: args.quantity,
            }),
            Commands::Sources { labels } => AppCommand::Sources { labels },
            Commands::Holdings => AppCommand::Holdings,
            Commands::History { holding_id } => AppCommand::History { holding_id },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => holdsnap::cli::setup::setup(),
        Some(cmd) => holdsnap::run_command(cmd.into(), cli.config_path.as_deref()).await,
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

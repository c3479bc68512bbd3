//! blocklog command-line entry point
//!
//! Thin shell over the session controller: initialize or reset a session
//! identity, inspect status, submit a single action, or print the
//! leaderboard.

#![deny(unused_imports)]
#![deny(unused_mut)]
#![warn(dead_code)]
#![warn(unused_must_use)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ethers::types::Address;
use ethers::utils::format_ether;
use tracing::{info, warn};

use blocklog::leaderboard::Leaderboard;
use blocklog::{ActionKind, ActionPayload, Config, SessionController};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show session status for an owner wallet
    Status {
        /// Owner wallet address (0x...)
        #[arg(long)]
        owner: String,
    },
    /// Create (or load) the session identity for an owner wallet
    Init {
        #[arg(long)]
        owner: String,
    },
    /// Destroy the session identity for an owner wallet
    Reset {
        #[arg(long)]
        owner: String,
    },
    /// Submit a single game action
    Send {
        #[arg(long)]
        owner: String,

        /// Action kind: place_block, clear_line, new_game or game_over
        action: String,

        /// Extra game data as a JSON object
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// Print the top of the leaderboard
    Leaderboard {
        #[arg(long, default_value = "10")]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(&args.config)?;

    match args.command {
        Command::Status { owner } => {
            let controller = SessionController::bootstrap(&config)?;
            let owner = parse_owner(&owner)?;
            if controller.load_identity(owner)?.is_some() {
                controller.refresh().await;
            }
            print_status(&controller);
        }
        Command::Init { owner } => {
            let controller = SessionController::bootstrap(&config)?;
            let owner = parse_owner(&owner)?;
            let address = controller.init_identity(owner)?;
            controller.refresh().await;
            println!("session wallet: {address:#x}");
            print_status(&controller);
        }
        Command::Reset { owner } => {
            let controller = SessionController::bootstrap(&config)?;
            let owner = parse_owner(&owner)?;
            controller.reset_identity(owner)?;
            println!("session identity cleared");
        }
        Command::Send {
            owner,
            action,
            payload,
        } => {
            let controller = SessionController::bootstrap(&config)?;
            let owner = parse_owner(&owner)?;
            let action: ActionKind = action.parse()?;
            let payload: ActionPayload =
                serde_json::from_str(&payload).context("payload must be a JSON object")?;

            controller.init_identity(owner)?;
            controller.refresh().await;

            let status = controller.status();
            if !status.is_ready {
                warn!(
                    balance = %format_ether(status.balance),
                    "session wallet is not funded above the threshold"
                );
            }

            info!(action = %action, "submitting action");
            let success = controller.execute_action(action, payload).await;
            print_status(&controller);
            if !success {
                anyhow::bail!("action was not confirmed");
            }
        }
        Command::Leaderboard { count } => {
            let store = blocklog::storage::open_store(&config.storage.path);
            let board = Leaderboard::new(store);
            for (index, entry) in board.top(count)?.iter().enumerate() {
                println!(
                    "{:>3}. {:#x}  score {:>8}  level {:>3}  tx {:>5}  spent {} ETH",
                    index + 1,
                    entry.owner,
                    entry.score,
                    entry.level,
                    entry.transactions,
                    format_ether(entry.gas_spent),
                );
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "blocklog=debug,info" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        let config = Config::from_file_with_env(path)
            .with_context(|| format!("failed to load configuration from {path}"))?;
        Ok(config)
    } else {
        info!(path = %path, "configuration file not found, using defaults");
        Ok(Config::default())
    }
}

fn parse_owner(owner: &str) -> Result<Address> {
    owner
        .parse()
        .with_context(|| format!("invalid owner address: {owner}"))
}

fn print_status(controller: &SessionController) {
    let status = controller.status();
    match status.address {
        Some(address) => println!("address:    {address:#x}"),
        None => println!("address:    (none)"),
    }
    println!("balance:    {} ETH", format_ether(status.balance));
    println!("ready:      {}", status.is_ready);
    match status.pending {
        Some(action) => println!("pending:    {action}"),
        None => println!("pending:    (none)"),
    }
    println!("queued:     {}", status.queued);
    match status.last_hash {
        Some(hash) => println!("last tx:    {hash:#x}"),
        None => println!("last tx:    (none)"),
    }
    if let Some(error) = &status.last_error {
        println!("last error: {error}");
    }
    println!(
        "totals:     {} transactions, {} ETH spent",
        status.totals.transactions,
        format_ether(status.totals.spent),
    );
}

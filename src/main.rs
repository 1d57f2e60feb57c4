mod api;
mod cache;
mod config;
mod connectivity;
mod error;
mod logging;
mod store;
mod wallet;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;

use crate::connectivity::{Connectivity, ManualConnectivity, ProbeConnectivity};
use crate::store::SqliteStore;
use crate::wallet::{OfflineService, SyncOutcome};

#[derive(Parser, Debug)]
#[command(name = "fare-wallet")]
#[command(about = "Offline-first token wallet for ride-hailing drivers")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fare-wallet/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Treat the network as unavailable
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show the wallet balance
  Balance {
    /// Ask the server even if a fresh snapshot is cached
    #[arg(long)]
    refresh: bool,
  },
  /// Spend tokens; recorded locally and synced when possible
  Debit {
    /// Transaction type (transfer, purchase, recharge, ...)
    kind: String,
    amount: Decimal,
    #[arg(short, long, default_value = "")]
    description: String,
  },
  /// List offline transactions
  Ledger {
    /// Only entries waiting for sync
    #[arg(long)]
    pending: bool,
  },
  /// Show the transaction history
  History,
  /// Push pending transactions to the server
  Sync,
  /// Report server availability
  Status,
  /// Requeue transactions that gave up syncing
  RetryFailed,
  /// Store the API token
  Login { token: String },
  /// Forget the API token
  Logout,
}

type Service = OfflineService<SqliteStore, dyn Connectivity>;

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&store::data_dir()?.join("logs"))?;

  let store = Arc::new(SqliteStore::open(config.storage.path.as_deref())?);
  let connectivity: Arc<dyn Connectivity> = if args.offline {
    Arc::new(ManualConnectivity::new(false))
  } else {
    Arc::new(ProbeConnectivity::new(&config.connectivity)?)
  };

  let service: Service = OfflineService::new(&config, store, connectivity)?;
  if let Some(token) = config::Config::env_token() {
    service.login(&token)?;
  }

  run(&service, args.command).await
}

async fn run(service: &Service, command: Command) -> Result<()> {
  match command {
    Command::Balance { refresh } => {
      let result = service.refresh_balance(refresh).await?;
      println!("{} ({})", result.data, result.source);
    }
    Command::Debit {
      kind,
      amount,
      description,
    } => {
      let receipt = service.record_debit(&kind, amount, &description).await?;
      println!(
        "Recorded {} {} (#{}); provisional balance {}",
        kind, amount, receipt.transaction.id, receipt.new_balance
      );
      // Let the background sync finish before the process exits
      if let Some(task) = receipt.sync_task {
        let _ = task.await;
      }
    }
    Command::Ledger { pending } => {
      let transactions = if pending {
        service.pending_transactions()?
      } else {
        service.transactions()?
      };
      for tx in transactions {
        println!(
          "{}  {}  {:<12} {:>12}  {:<24} {}",
          tx.id,
          tx.created_at.format("%Y-%m-%d %H:%M"),
          tx.kind,
          tx.amount,
          tx.status.label(),
          tx.description
        );
      }
    }
    Command::History => {
      for entry in service.history() {
        println!(
          "{}  {:<12} {:>12}  {:<24} {}",
          entry.date.format("%Y-%m-%d %H:%M"),
          entry.kind,
          entry.amount,
          entry.status,
          entry.description
        );
      }
    }
    Command::Sync => {
      let report = service.sync_pending().await?;
      match report.outcome {
        SyncOutcome::Skipped(reason) => println!("Nothing done: {:?}", reason),
        SyncOutcome::Aborted => println!(
          "Server unreachable; synced {}, {} still pending",
          report.synced.len(),
          report.still_pending
        ),
        SyncOutcome::Completed => println!(
          "Synced {}, failed {}, {} still pending",
          report.synced.len(),
          report.dead_lettered.len(),
          report.still_pending
        ),
      }
      if let Some(balance) = report.reconciled_balance {
        println!("Balance reconciled: {}", balance);
      }
    }
    Command::Status => {
      println!("{}", service.check_server_status().await);
    }
    Command::RetryFailed => {
      let revived = service.retry_failed().await?;
      println!("Requeued {} transaction(s)", revived);
    }
    Command::Login { token } => {
      service.login(&token)?;
      println!("Token stored");
    }
    Command::Logout => {
      service.logout()?;
      println!("Token removed");
    }
  }

  Ok(())
}

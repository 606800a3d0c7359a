use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use workorder_settlement::application::orchestrator::SettlementOrchestrator;
use workorder_settlement::application::scheduler::SettlementScheduler;
use workorder_settlement::application::webhook::WebhookReconciler;
use workorder_settlement::config::SettlementConfig;
use workorder_settlement::domain::fees::{CardType, ProcessorId, compare_processors};
use workorder_settlement::domain::money::Amount;
use workorder_settlement::domain::ports::SettlementStoreRef;
use workorder_settlement::infrastructure::clock::SystemClock;
use workorder_settlement::infrastructure::in_memory::InMemoryStore;
use workorder_settlement::infrastructure::notifications::LogNotificationSink;
use workorder_settlement::interfaces::csv::receipt_writer::ReceiptWriter;
use workorder_settlement::interfaces::http::{AppState, router};
use workorder_settlement::telemetry;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and the expiry scheduler
    Serve(SettlementConfig),
    /// Print the processor fee comparison for an amount as JSON
    Compare {
        #[arg(long)]
        amount: Decimal,
        #[arg(long, default_value = "credit")]
        card_type: CardType,
    },
    /// Write every stored receipt to stdout as CSV
    ExportReceipts {
        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long, env = "DB_PATH")]
        db_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(config) => serve(config).await,
        Command::Compare { amount, card_type } => {
            let amount = Amount::new(amount).into_diagnostic()?;
            let comparison =
                compare_processors(amount, card_type, &ProcessorId::ALL).into_diagnostic()?;
            let json = serde_json::to_string_pretty(&comparison).into_diagnostic()?;
            println!("{json}");
            Ok(())
        }
        Command::ExportReceipts { db_path } => {
            let store = open_store(db_path)?;
            let receipts = store.receipts().await.into_diagnostic()?;
            let stdout = io::stdout();
            let mut writer = ReceiptWriter::new(stdout.lock());
            writer.write_receipts(receipts).into_diagnostic()?;
            Ok(())
        }
    }
}

async fn serve(config: SettlementConfig) -> Result<()> {
    telemetry::init(&config.log_level).into_diagnostic()?;

    let store = open_store(config.db_path.clone())?;
    let orchestrator = Arc::new(
        SettlementOrchestrator::new(
            store,
            config.processor_registry(),
            Arc::new(LogNotificationSink),
            Arc::new(SystemClock),
        )
        .with_currency(config.currency.clone()),
    );

    let webhooks = match config.webhook_secret.as_deref() {
        Some(secret) if !secret.is_empty() => Some(Arc::new(
            WebhookReconciler::new(orchestrator.clone(), secret)
                .with_tolerance(config.webhook_tolerance()),
        )),
        _ => {
            warn!("WEBHOOK_SECRET not set, gateway webhooks will be rejected");
            None
        }
    };

    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let scheduler = SettlementScheduler::new(orchestrator.clone())
        .with_interval(config.sweep_interval());
    let sweeper = tokio::spawn(scheduler.run(async move {
        let _ = stop_rx.changed().await;
    }));

    let app = router(AppState {
        orchestrator,
        webhooks,
    });
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .into_diagnostic()?;
    info!(host = %config.host, port = config.port, "settlement service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .into_diagnostic()?;

    let _ = stop_tx.send(true);
    sweeper.await.into_diagnostic()?;
    Ok(())
}

fn open_store(db_path: Option<PathBuf>) -> Result<SettlementStoreRef> {
    if let Some(db_path) = db_path {
        #[cfg(feature = "storage-rocksdb")]
        {
            use workorder_settlement::infrastructure::rocksdb::RocksDBStore;
            let store = RocksDBStore::open(db_path).into_diagnostic()?;
            return Ok(Arc::new(store));
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        {
            let _ = db_path;
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
        }
    }
    Ok(Arc::new(InMemoryStore::new()))
}

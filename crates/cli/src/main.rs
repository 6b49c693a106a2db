use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use shelf_app::{FunctionHandler, FunctionRuntime, GatewayEvent, TableBookStore};
use shelf_db::StorageModule;
use shelf_kernel::settings::Settings;

/// Operate the shelf book inventory service.
#[derive(Debug, Parser)]
#[command(name = "shelf", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API until interrupted.
    Serve,
    /// Create the books table if it is missing and print its description.
    Provision,
    /// Run one gateway function against an event and print the response.
    Invoke {
        /// post_book, get_book, list_books, put_book or delete_book.
        function: FunctionHandler,
        /// Event JSON file; read from stdin when omitted.
        #[arg(long)]
        event: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load().context("failed to load shelf settings")?;
    shelf_telemetry::init(&settings.telemetry)?;

    match cli.command {
        Command::Serve => shelf_app::app::serve(settings).await,
        Command::Provision => provision(&settings).await,
        Command::Invoke { function, event } => invoke(settings, function, event).await,
    }
}

async fn provision(settings: &Settings) -> anyhow::Result<()> {
    let storage = StorageModule::open(&settings.storage).await?;
    let store = TableBookStore::new(storage.engine(), &settings.storage);

    let description = store
        .describe()
        .await
        .with_context(|| format!("failed to provision table '{}'", store.table_name()))?;
    println!("{}", serde_json::to_string_pretty(description)?);
    Ok(())
}

async fn invoke(
    settings: Settings,
    function: FunctionHandler,
    event_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let raw = match &event_path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read event file {}", path.display()))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("failed to read event from stdin")?;
            raw
        }
    };

    let event: GatewayEvent = if raw.trim().is_empty() {
        GatewayEvent::default()
    } else {
        serde_json::from_str(&raw).context("event is not a valid gateway event")?
    };

    let runtime = FunctionRuntime::new(settings.storage);
    let response = runtime.invoke(function, &event).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

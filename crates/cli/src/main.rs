//! Storefront CLI - Database migrations, fixtures and reports.
//!
//! # Usage
//!
//! ```bash
//! # Run store database migrations
//! store-cli migrate
//!
//! # Load a YAML fixture
//! store-cli seed fixtures/demo.yaml
//!
//! # List reports, then run one
//! store-cli report
//! store-cli report top-products --limit 3
//! ```
//!
//! # Environment Variables
//!
//! - `STORE_DATABASE_URL` (or `DATABASE_URL`) - `PostgreSQL` connection
//!   string; `memory://` runs against an empty in-process store

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use storefront_core::{CollectionId, ProductId};
use storefront_store::reports::ReportArgs;

mod commands;

#[derive(Parser)]
#[command(name = "store-cli")]
#[command(author, version, about = "Storefront store CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Load catalogue, customers and orders from a YAML fixture
    Seed {
        /// Path to the fixture file
        file: String,
    },
    /// Run a named report and print it as JSON (lists reports without a name)
    Report {
        /// Report name
        name: Option<String>,

        /// Product id for `units-sold` and `product-tags`
        #[arg(long, default_value_t = 1)]
        product: i32,

        /// Restrict `price-stats` to a collection id
        #[arg(long)]
        collection: Option<i32>,

        /// Lower bound for `price-range`
        #[arg(long, default_value = "20")]
        min_price: Decimal,

        /// Upper bound for `price-range`
        #[arg(long, default_value = "30")]
        max_price: Decimal,

        /// Order count above which a customer is frequent
        #[arg(long, default_value_t = 5)]
        min_orders: i64,

        /// Row limit for recent and top reports
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storefront_cli=info,storefront_store=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Seed { file } => commands::seed::run(&file).await?,
        Commands::Report {
            name: None, ..
        } => commands::report::list(),
        Commands::Report {
            name: Some(name),
            product,
            collection,
            min_price,
            max_price,
            min_orders,
            limit,
        } => {
            let args = ReportArgs {
                product: ProductId::new(product),
                collection: collection.map(CollectionId::new),
                min_price,
                max_price,
                min_orders,
                limit,
            };
            commands::report::run(&name, &args).await?;
        }
    }
    Ok(())
}

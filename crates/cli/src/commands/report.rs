//! Report commands.

use storefront_store::reports::{self, CATALOGUE, ReportArgs};

use super::open;

/// Print the report catalogue.
#[allow(clippy::print_stdout)]
pub fn list() {
    println!("Available reports:");
    for (name, description) in CATALOGUE {
        println!("  {name:<24} {description}");
    }
}

/// Run a report and print its rows as pretty JSON.
///
/// # Errors
///
/// Returns an error if storage cannot be opened, the report is unknown or
/// its queries fail.
pub async fn run(name: &str, args: &ReportArgs) -> Result<(), Box<dyn std::error::Error>> {
    let db = open().await?;
    let rows = reports::run(&db, name, args).await?;

    #[allow(clippy::print_stdout)]
    {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    }
    Ok(())
}

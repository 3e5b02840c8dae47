//! tagrail CLI — bulk tag normalization for record stores.
//!
//! Scans collections for `prefix_value` tags, groups specific values into
//! broad shopper-facing categories with an LLM, and patches the derived
//! list back onto every record.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}

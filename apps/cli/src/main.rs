//! thesiskit CLI: assemble academic projects and render them to PDF.
//!
//! Creates projects on disk, attaches images and sources, and runs builds
//! with optional content generation and image search.

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

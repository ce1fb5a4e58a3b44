mod api;
mod database;
mod index;
mod llm;
mod pipeline;
mod session_log;
mod settings;
mod web;

use std::{process::exit, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::{
    database::Database,
    pipeline::RagPipeline,
    settings::{Args, Command, Settings},
};

#[tokio::main]
async fn main() {
    init_tracing();
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("{e:#}");
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

/// Logs go to stderr so `ask` output on stdout stays clean. `RUST_LOG`
/// overrides the default `info` level.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> Result<()> {
    let settings =
        Settings::from_file(args.config.as_deref()).context("failed to load settings")?;

    match args.command {
        Command::Ask { question } => {
            let pipeline = RagPipeline::from_settings(&settings)?;
            let outcome = pipeline.ask(&question).await?;
            println!("{}", outcome.render());
        }
        Command::Serve => {
            let pipeline = Arc::new(RagPipeline::from_settings(&settings)?);
            web::serve(api::schema(pipeline), settings.web.address).await;
        }
        Command::ClearCache => {
            let cache = Database::connect(&settings.storage.cache_path)?;
            let removed = cache.len();
            cache.clear()?;
            info!(removed, "cache cleared");
        }
    }
    Ok(())
}

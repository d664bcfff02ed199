//! vocalis command line shell
//!
//! Manages speech models (Whisper, Parakeet, Piper, Kokoro, pyannote) in a
//! shared hub cache. Results are printed as JSON.

mod commands;
mod state;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use vocalis_core::{init_logging, Config};

use commands::Cli;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    init_logging(&config.log)?;
    for warning in &config.warnings {
        warn!("{}", warning);
    }
    info!(
        "Cache {} | catalog {}",
        config.cache_dir.display(),
        config.catalog_url
    );

    let state = AppState::new(&config).context("failed to initialize model cache")?;
    match cli.command {
        Some(command) => print_result(commands::dispatch(&state, command).await)?,
        None => run_interactive(&state).await?,
    }

    for (family, model_id) in state.shutdown() {
        warn!("{} model {} still in use at shutdown", family, model_id);
    }
    Ok(())
}

/// Read one command per line from stdin so loaded models stay resident between commands
async fn run_interactive(state: &AppState) -> anyhow::Result<()> {
    println!("{}", Cli::command().render_help());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.split_whitespace().next() {
            None => continue,
            Some("quit") | Some("exit") => break,
            _ => {}
        }
        let args = std::iter::once("vocalis-app").chain(line.split_whitespace());
        let command = match Cli::try_parse_from(args) {
            Ok(Cli { command: Some(command) }) => command,
            Ok(Cli { command: None }) => continue,
            Err(e) => {
                // Help and version requests land here too
                e.print()?;
                continue;
            }
        };
        if let Err(e) = print_result(commands::dispatch(state, command).await) {
            error!("{:#}", e);
        }
    }
    Ok(())
}

fn print_result(result: anyhow::Result<serde_json::Value>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

//! Command parsing and dispatch
//!
//! One command per invocation (`vocalis-app list-local whisper`), or one per
//! line on stdin when started without a subcommand.

pub mod asr;
pub mod diarization;
pub mod models;
pub mod tts;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use vocalis_core::Family;

use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(
    name = "vocalis-app",
    about = "Manage speech models in the local hub cache",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Cli {
    /// Start an interactive shell when omitted
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// List cached models of a family
    ListLocal { family: Family },
    /// Search the catalog for models of a family
    ListRemote {
        family: Family,
        #[arg(default_value_t = models::REMOTE_LIST_LIMIT)]
        limit: usize,
    },
    /// Show one cached model
    Get { family: Family, model_id: String },
    /// Download a model into the cache
    Download { family: Family, model_id: String },
    /// Remove a model from the cache
    Delete { family: Family, model_id: String },
    /// Load a model and describe it
    Load { family: Family, model_id: String },
    /// Unload an idle model
    Unload { family: Family, model_id: String },
    /// Loaded models and idle timeouts
    Status { family: Option<Family> },
}

/// Run `$body` with `$executor` bound to the executor of `$family`
macro_rules! with_executor {
    ($state:expr, $family:expr, $executor:ident => $body:expr) => {
        match $family {
            Family::Whisper => {
                let $executor = &$state.whisper;
                $body
            }
            Family::Parakeet => {
                let $executor = &$state.parakeet;
                $body
            }
            Family::Piper => {
                let $executor = &$state.piper;
                $body
            }
            Family::Kokoro => {
                let $executor = &$state.kokoro;
                $body
            }
            Family::Pyannote => {
                let $executor = &$state.pyannote;
                $body
            }
        }
    };
}

pub async fn dispatch(state: &AppState, command: Command) -> anyhow::Result<Value> {
    match command {
        Command::ListLocal { family } => with_executor!(state, family, e => models::list_local(e)),
        Command::ListRemote { family, limit } => {
            with_executor!(state, family, e => models::list_remote(e, limit).await)
        }
        Command::Get { family, model_id: id } => {
            with_executor!(state, family, e => models::get_model(e, &id))
        }
        Command::Download { family, model_id: id } => {
            with_executor!(state, family, e => models::download_model(e, &id).await)
        }
        Command::Delete { family, model_id: id } => {
            with_executor!(state, family, e => models::delete_model(e, &id))
        }
        Command::Unload { family, model_id: id } => {
            with_executor!(state, family, e => models::unload_model(e, &id))
        }
        Command::Load { family, model_id: id } => match family {
            Family::Whisper => asr::load_whisper(&state.whisper, &id).await,
            Family::Parakeet => asr::load_parakeet(&state.parakeet, &id).await,
            Family::Piper => tts::load_piper(&state.piper, &id).await,
            Family::Kokoro => tts::load_kokoro(&state.kokoro, &id).await,
            Family::Pyannote => diarization::load_pyannote(&state.pyannote, &id).await,
        },
        Command::Status { family: Some(family) } => {
            with_executor!(state, family, e => models::status(e))
        }
        Command::Status { family: None } => {
            let mut all = Map::new();
            for family in Family::ALL {
                let status = with_executor!(state, family, e => models::status(e))?;
                all.insert(family.to_string(), status);
            }
            Ok(Value::Object(all))
        }
    }
}

//! # stepgraph
//!
//! Runs the bundled demo graphs against the in-memory checkpointer and store
//! (`external-memory` keeps its thread in checkpoint files instead).
//! Set `RUST_LOG=stepgraph_core=debug` to watch the supersteps.

mod demos;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use stepgraph_core::{EngineSettings, MultitaskStrategy};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stepgraph")]
#[command(about = "stepgraph - checkpointed graph execution demos", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Engine settings file (YAML); STEPGRAPH_* variables override it
    #[arg(short, long, global = true, env = "STEPGRAPH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Conditional routing between two nodes
    Simple {
        /// Mood picked by the router: happy or sad
        #[arg(short, long, default_value = "happy")]
        mood: String,
    },

    /// Concurrent writers with and without an append reducer
    Reducers,

    /// Fan-out to two branches and fan-in with a join edge
    Parallel,

    /// One task per subject with Send, then a single reduce step
    MapReduce {
        /// Subjects to fan out over
        #[arg(num_args = 1.., default_values = ["cats", "dogs", "owls"])]
        subjects: Vec<String>,
    },

    /// Agent loop that pauses before running tools
    Breakpoints,

    /// Node that interrupts itself on long input, then edit and resume
    DynamicBreakpoints {
        #[arg(short, long, default_value = "hello world")]
        input: String,
    },

    /// Browse history, replay a checkpoint and fork from it
    TimeTravel,

    /// Long-term memory shared across threads of one user
    Memory {
        #[arg(short, long, default_value = "demo-user")]
        user: String,
    },

    /// Two runs on one thread under a multitask strategy
    DoubleTexting {
        #[arg(short, long, value_enum, default_value_t = Strategy::Enqueue)]
        strategy: Strategy,
    },

    /// Stream updates and model tokens of an agent run
    Stream,

    /// Compiled graph used as a node of a parent graph
    Subgraph,

    /// Keep a chat history short with trim and filter helpers
    TrimFilter,

    /// Chatbot that folds older messages into a running summary
    Summarize {
        /// Human turns sent one after another on the same thread
        #[arg(num_args = 1.., default_values = [
            "hi! I'm Lance",
            "what's my name?",
            "I like the 49ers!",
            "who is their best player?",
        ])]
        turns: Vec<String>,
    },

    /// Summarizing chatbot whose thread lives in checkpoint files
    ExternalMemory {
        /// Directory holding the checkpoint journals
        #[arg(short, long)]
        dir: Option<PathBuf>,

        #[arg(short, long, default_value = "hi! I'm Lance")]
        message: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    Reject,
    Enqueue,
    Interrupt,
    Rollback,
}

impl From<Strategy> for MultitaskStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Reject => MultitaskStrategy::Reject,
            Strategy::Enqueue => MultitaskStrategy::Enqueue,
            Strategy::Interrupt => MultitaskStrategy::Interrupt,
            Strategy::Rollback => MultitaskStrategy::Rollback,
        }
    }
}

fn load_settings(path: Option<&PathBuf>) -> anyhow::Result<EngineSettings> {
    let settings = match path {
        Some(path) => EngineSettings::from_file(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?,
        None => EngineSettings::default(),
    };
    settings
        .with_env_overrides()
        .context("invalid STEPGRAPH_* environment override")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_ref())?;
    tracing::debug!(?settings, "engine settings loaded");

    match cli.command {
        Commands::Simple { mood } => demos::simple(&settings, &mood).await,
        Commands::Reducers => demos::reducers(&settings).await,
        Commands::Parallel => demos::parallel(&settings).await,
        Commands::MapReduce { subjects } => demos::map_reduce(&settings, subjects).await,
        Commands::Breakpoints => demos::breakpoints(&settings).await,
        Commands::DynamicBreakpoints { input } => demos::dynamic_breakpoints(&settings, &input).await,
        Commands::TimeTravel => demos::time_travel(&settings).await,
        Commands::Memory { user } => demos::memory(&settings, &user).await,
        Commands::DoubleTexting { strategy } => demos::double_texting(&settings, strategy.into()).await,
        Commands::Stream => demos::stream(&settings).await,
        Commands::Subgraph => demos::subgraph(&settings).await,
        Commands::TrimFilter => demos::trim_filter().await,
        Commands::Summarize { turns } => demos::summarize(&settings, turns).await,
        Commands::ExternalMemory { dir, message } => {
            let dir = dir.unwrap_or_else(|| std::env::temp_dir().join("stepgraph-external-memory"));
            demos::external_memory(&settings, &dir, &message).await
        }
    }
}

// Workflow engine CLI
//
// Design Decision: clap derive for ergonomic argument parsing, as in the
// teacher's CLI.
// Design Decision: operates directly against the configured Postgres
// store rather than over HTTP, since the engine has no wire protocol.

mod commands;
mod context;
mod output;

use clap::{Parser, Subcommand};

use commands::definitions::DefinitionsCommand;
use commands::engines::EnginesCommand;
use commands::failovers::FailoversCommand;
use commands::workflows::WorkflowsCommand;
use context::Context;
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "workflow")]
#[command(about = "Operate a workflow engine deployment's definitions and instances")]
#[command(version)]
pub struct Cli {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Output format.
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register and inspect workflow definitions.
    Definitions {
        #[command(subcommand)]
        command: DefinitionsCommand,
    },
    /// Start, inspect, and control workflow instances.
    Workflows {
        #[command(subcommand)]
        command: WorkflowsCommand,
    },
    /// Inspect the engine fleet's registered instances.
    Engines {
        #[command(subcommand)]
        command: EnginesCommand,
    },
    /// Inspect recorded failover events.
    Failovers {
        #[command(subcommand)]
        command: FailoversCommand,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let output = OutputFormat::from_str(&cli.output);
    let ctx = Context::connect(&cli.database_url).await?;

    match cli.command {
        Commands::Definitions { command } => commands::definitions::run(command, &ctx, output).await,
        Commands::Workflows { command } => commands::workflows::run(command, &ctx, output).await,
        Commands::Engines { command } => commands::engines::run(command, &ctx, output).await,
        Commands::Failovers { command } => commands::failovers::run(command, &ctx, output).await,
    }
}

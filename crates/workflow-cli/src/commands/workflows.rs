// `workflow workflows ...`

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Subcommand;
use uuid::Uuid;

use crate::context::Context;
use crate::output::{print_field, OutputFormat};

#[derive(Subcommand)]
pub enum WorkflowsCommand {
    /// Start a new instance of a definition's active version.
    Start {
        definition: String,
        #[arg(long)]
        version: Option<i32>,
        /// Path to a JSON file of input values; defaults to `{}`.
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Show an instance's current status.
    Status { id: Uuid },
    /// Request a running instance pause at its next node boundary.
    Pause { id: Uuid },
    /// Resume a paused instance from where it left off.
    Resume { id: Uuid },
    /// Request a running or paused instance be cancelled.
    Cancel { id: Uuid },
}

pub async fn run(cmd: WorkflowsCommand, ctx: &Context, output: OutputFormat) -> Result<()> {
    match cmd {
        WorkflowsCommand::Start {
            definition,
            version,
            input,
        } => {
            let def = match version {
                Some(v) => ctx.definitions.get_version(&definition, v).await?,
                None => ctx.definitions.get(&definition).await?,
            };
            let inputs = match input {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    serde_json::from_str(&raw)
                        .with_context(|| format!("parsing {}", path.display()))?
                }
                None => serde_json::json!({}),
            };

            let instance = ctx.engine.start(&def, inputs).await?;
            print_instance(&instance, output);
            Ok(())
        }
        WorkflowsCommand::Status { id } => {
            let instance = ctx.store.get_instance(id).await?;
            print_instance(&instance, output);
            Ok(())
        }
        WorkflowsCommand::Pause { id } => {
            ctx.engine.pause(id).await?;
            if output.is_text() {
                println!("pause requested for {id}");
            }
            Ok(())
        }
        WorkflowsCommand::Resume { id } => {
            let instance = ctx.engine.resume(ctx.definition_store.as_ref(), id).await?;
            print_instance(&instance, output);
            Ok(())
        }
        WorkflowsCommand::Cancel { id } => {
            ctx.engine.cancel(id).await?;
            if output.is_text() {
                println!("cancel requested for {id}");
            }
            Ok(())
        }
    }
}

fn print_instance(instance: &workflow_core::domain::WorkflowInstance, output: OutputFormat) {
    if output.is_text() {
        print_field("id", &instance.id.to_string());
        print_field("name", &instance.name);
        print_field("status", &instance.status.to_string());
        print_field("retries", &format!("{}/{}", instance.retry_count, instance.max_retries));
        if let Some(err) = &instance.error_message {
            print_field("error", err);
        }
    } else {
        output.print_value(instance);
    }
}

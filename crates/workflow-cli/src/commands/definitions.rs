// `workflow definitions ...`

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use workflow_core::prelude::*;

use crate::context::Context;
use crate::output::{print_field, OutputFormat};

#[derive(Subcommand)]
pub enum DefinitionsCommand {
    /// Register a new version of a definition from a JSON file.
    Create {
        /// Path to a JSON file holding name/nodes/inputs/outputs/config.
        file: PathBuf,
        /// Version number for this registration.
        #[arg(long)]
        version: i32,
        /// Make this the active version immediately.
        #[arg(long)]
        activate: bool,
    },
    /// Flip which version of a definition is resolved by name.
    Activate { name: String, version: i32 },
    /// Show a definition (active version, unless --version is given).
    Show {
        name: String,
        #[arg(long)]
        version: Option<i32>,
    },
}

/// On-disk shape for `definitions create`; deliberately narrower than
/// `WorkflowDefinition` since `id`/`version`/`created_at`/`is_active` are
/// assigned by this command, not authored by hand.
#[derive(Debug, Deserialize, Serialize)]
struct DefinitionFile {
    name: String,
    nodes: Vec<Node>,
    #[serde(default)]
    inputs: Vec<InputSpec>,
    #[serde(default)]
    outputs: Vec<String>,
    #[serde(default)]
    config: DefinitionConfig,
}

pub async fn run(cmd: DefinitionsCommand, ctx: &Context, output: OutputFormat) -> Result<()> {
    match cmd {
        DefinitionsCommand::Create {
            file,
            version,
            activate,
        } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let parsed: DefinitionFile =
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;

            let definition = WorkflowDefinition {
                id: Uuid::now_v7(),
                name: parsed.name.clone(),
                version,
                nodes: parsed.nodes,
                inputs: parsed.inputs,
                outputs: parsed.outputs,
                config: parsed.config,
                is_active: activate,
                created_at: chrono::Utc::now(),
            };

            if definition.nodes.is_empty() {
                anyhow::bail!("definition must have at least one node");
            }
            let ids = definition.all_node_ids();
            let mut seen = std::collections::HashSet::new();
            for id in &ids {
                if !seen.insert(*id) {
                    anyhow::bail!("duplicate node id `{id}`");
                }
            }

            ctx.definitions.create(definition.clone()).await?;

            if activate {
                ctx.definitions
                    .activate(&parsed.name, version, "cli")
                    .await?;
            }

            if output.is_text() {
                println!("created {} v{}", parsed.name, version);
            } else {
                output.print_value(&definition);
            }
            Ok(())
        }
        DefinitionsCommand::Activate { name, version } => {
            ctx.definitions.activate(&name, version, "cli").await?;
            if output.is_text() {
                println!("{name} v{version} is now active");
            }
            Ok(())
        }
        DefinitionsCommand::Show { name, version } => {
            let definition = match version {
                Some(v) => ctx.definitions.get_version(&name, v).await?,
                None => ctx.definitions.get(&name).await?,
            };
            if output.is_text() {
                print_field("name", &definition.name);
                print_field("version", &definition.version.to_string());
                print_field("active", &definition.is_active.to_string());
                print_field("nodes", &definition.all_node_ids().join(", "));
            } else {
                output.print_value(&definition);
            }
            Ok(())
        }
    }
}

// `workflow failovers ...`

use anyhow::Result;
use clap::Subcommand;

use crate::context::Context;
use crate::output::{print_table_header, print_table_row, OutputFormat};

#[derive(Subcommand)]
pub enum FailoversCommand {
    /// List recorded failover events, most recent first.
    List,
}

pub async fn run(cmd: FailoversCommand, ctx: &Context, output: OutputFormat) -> Result<()> {
    match cmd {
        FailoversCommand::List => {
            let events = ctx.store.list_failover_events().await?;

            if output.is_text() {
                if events.is_empty() {
                    println!("no failover events recorded");
                    return Ok(());
                }
                print_table_header(&[("EVENT", 36), ("FAILED", 36), ("TAKEOVER", 36), ("STATUS", 12)]);
                for event in &events {
                    let takeover = event
                        .takeover_engine_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".into());
                    print_table_row(&[
                        (&event.event_id.to_string(), 36),
                        (&event.failed_engine_id.to_string(), 36),
                        (&takeover, 36),
                        (&event.status.to_string(), 12),
                    ]);
                }
            } else {
                output.print_value(&events);
            }
            Ok(())
        }
    }
}

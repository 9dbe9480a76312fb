// `workflow engines ...`

use anyhow::Result;
use clap::Subcommand;

use crate::context::Context;
use crate::output::{print_table_header, print_table_row, OutputFormat};

#[derive(Subcommand)]
pub enum EnginesCommand {
    /// List engines heartbeating within the liveness window.
    List {
        #[arg(long, default_value = "120")]
        liveness_window_seconds: i64,
    },
}

pub async fn run(cmd: EnginesCommand, ctx: &Context, output: OutputFormat) -> Result<()> {
    match cmd {
        EnginesCommand::List {
            liveness_window_seconds,
        } => {
            let engines = ctx
                .registry
                .list_active(chrono::Duration::seconds(liveness_window_seconds))
                .await?;

            if output.is_text() {
                if engines.is_empty() {
                    println!("no active engines");
                    return Ok(());
                }
                print_table_header(&[("INSTANCE", 36), ("HOST", 20), ("LOAD", 10), ("EXECUTORS", 30)]);
                for engine in &engines {
                    let load = format!(
                        "{}/{}",
                        engine.load_info.current_load, engine.load_info.max_capacity
                    );
                    print_table_row(&[
                        (&engine.instance_id.to_string(), 36),
                        (&engine.hostname, 20),
                        (&load, 10),
                        (&engine.supported_executors.join(","), 30),
                    ]);
                }
            } else {
                output.print_value(&engines);
            }
            Ok(())
        }
    }
}

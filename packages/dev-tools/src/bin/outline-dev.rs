//! Development command driver for the outline engine
//!
//! Reads one JSON `CommandEnvelope` per line from stdin, submits each to an
//! `OutlineService` and prints the resulting events to stdout as JSON lines.
//! Rejected commands are written to stdout as `{"error": ...}` and the driver
//! carries on with the next line.
//!
//! # Usage
//!
//! ```bash
//! # Create container "episode-1" (if missing) and drive it from a file
//! cargo run --bin outline-dev -- episode-1 "Pilot" < commands.jsonl
//!
//! # Dump the final outline of the container after stdin closes
//! OUTLINE_DEV_DUMP_TREE=1 cargo run --bin outline-dev -- episode-1 < commands.jsonl
//! ```
//!
//! A command line looks like:
//!
//! ```json
//! {"eventId":"6f1c...","userId":"host","command":{"type":"InsertNode","containerId":"episode-1","content":"Intro","placement":{"mode":"last","parentId":null}}}
//! ```
//!
//! # Environment Variables
//!
//! - `OUTLINE_DATABASE_PATH`, `OUTLINE_QUEUE_CAPACITY`, `OUTLINE_EVENT_CAPACITY`:
//!   engine configuration (see `outline_core::config`)
//! - `OUTLINE_DEV_DUMP_TREE`: print the materialized tree on exit
//! - `RUST_LOG`: logging level (e.g., "info", "debug", "trace")

use std::env;

use outline_core::{CommandEnvelope, CommandOutcome, OutlineConfig, OutlineService};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = OutlineConfig::from_env()?;
    tracing::info!("Database path: {}", config.database_path.display());

    let service = OutlineService::new(config).await?;

    let mut args = env::args().skip(1);
    let container = args.next();
    if let Some(container_id) = &container {
        let title = args.next().unwrap_or_else(|| container_id.clone());
        if service.create_container(container_id, &title).await? {
            tracing::info!("Created container '{}'", container_id);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("line {}: not a command envelope: {}", line_number, e);
                println!("{}", serde_json::json!({ "line": line_number, "error": e.to_string() }));
                continue;
            }
        };

        match service.submit(envelope).await {
            Ok(CommandOutcome::Applied(events)) => {
                for event in events {
                    println!("{}", serde_json::to_string(&event)?);
                }
            }
            Ok(CommandOutcome::Noop) => tracing::info!("line {}: nothing to do", line_number),
            Ok(CommandOutcome::Duplicate) => {
                tracing::info!("line {}: already applied", line_number)
            }
            Err(e) if e.is_fatal() => {
                tracing::error!("line {}: {}", line_number, e);
                return Err(e.into());
            }
            Err(e) => {
                println!("{}", serde_json::json!({ "line": line_number, "error": e.to_string() }));
            }
        }
    }

    if env::var("OUTLINE_DEV_DUMP_TREE").is_ok() {
        if let Some(container_id) = &container {
            let tree = service.materialize_tree(container_id).await?;
            println!("{}", serde_json::to_string_pretty(&tree)?);
        }
    }

    service.shutdown().await?;
    Ok(())
}

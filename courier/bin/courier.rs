//! Command-line utility for operating the courier queue
//!
//! Enqueue accepted messages, inspect what the scheduler would pick up next,
//! feed transmission outcomes back in, and list resolved deliveries.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use courier::{Courier, Relay};
use courier_common::{Address, OutcomeCode, logging};
use courier_delivery::Resolved;
use courier_store::{QueueId, QueuedMessage};

/// Command-line utility for operating the courier queue
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Operate the courier delivery queue", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file (defaults to `COURIER_CONFIG`, then
    /// ./courier.config.ron, then /etc/courier/courier.config.ron)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue a message, one record per recipient
    Enqueue {
        /// Caller-supplied message classification
        #[arg(long = "type", default_value = "mail")]
        message_type: String,

        /// Correlation id shared by every recipient of the message
        #[arg(long)]
        message_id: String,

        /// Envelope sender
        #[arg(long)]
        from: Address,

        /// Envelope recipients
        #[arg(long, required = true, num_args = 1..)]
        to: Vec<Address>,

        /// File holding the raw message (empty payload if omitted)
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// List records awaiting their first attempt
    New {
        /// Maximum number of records (capped at the configured batch size)
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List records due for another attempt
    Due {
        /// Maximum number of records (capped at the configured batch size)
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Report the outcome of a delivery attempt
    Report {
        /// Queue record the attempt was made for
        queue_id: QueueId,

        /// Reply code of the attempt (e.g. 250, 451, 550)
        code: String,
    },
    /// List resolved deliveries
    Statuses,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => Courier::find()?,
    };
    let relay = Courier::load(&config_path)?.build()?;

    match cli.command {
        Commands::Enqueue {
            message_type,
            message_id,
            from,
            to,
            data,
        } => cmd_enqueue(&relay, &message_type, &message_id, &from, &to, data).await?,
        Commands::New { limit } => {
            let records = relay.select_new(limit).await?;
            print_records(&records);
            relay.release(&records);
        }
        Commands::Due { limit } => {
            let records = relay.select_due(limit).await?;
            print_records(&records);
            relay.release(&records);
        }
        Commands::Report { queue_id, code } => {
            match relay.report(&queue_id, OutcomeCode::new(code)).await? {
                Resolved::Retrying { repeat_count } => {
                    println!("{queue_id}: retry scheduled (attempt {repeat_count})");
                }
                Resolved::Finalized {
                    status,
                    repeat_count,
                } => {
                    println!(
                        "{queue_id}: {} with {} after {repeat_count} attempt(s)",
                        status.resolution, status.outcome
                    );
                }
            }
        }
        Commands::Statuses => cmd_statuses(&relay).await?,
    }

    Ok(())
}

async fn cmd_enqueue(
    relay: &Relay,
    message_type: &str,
    message_id: &str,
    from: &Address,
    to: &[Address],
    data: Option<PathBuf>,
) -> anyhow::Result<()> {
    let payload = match data {
        Some(path) => tokio::fs::read(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?,
        None => Vec::new(),
    };

    let report = relay
        .enqueue(message_type, message_id, from, to, payload)
        .await;

    for id in &report.queued {
        println!("queued {id}");
    }
    for (recipient, err) in &report.failed {
        eprintln!("failed {recipient}: {err}");
    }

    if report.queued.is_empty() && !report.failed.is_empty() {
        anyhow::bail!("No recipients of {message_id} could be queued");
    }

    Ok(())
}

fn print_records(records: &[QueuedMessage]) {
    println!(
        "{:<28} {:<32} {:<9} {:<8} {:<6}",
        "QUEUE ID", "RECIPIENT", "ATTEMPTS", "LAST", "AGE"
    );
    println!("{}", "-".repeat(87));

    for record in records {
        let last = if record.pending_outcome.is_empty() {
            "-"
        } else {
            &record.pending_outcome
        };

        println!(
            "{:<28} {:<32} {:<9} {:<8} {:<6}",
            record.id.to_string(),
            record.recipient,
            record.repeat_count,
            last,
            format_age(record.id.timestamp_ms())
        );
    }

    println!("\nTotal: {} record(s)", records.len());
}

async fn cmd_statuses(relay: &Relay) -> anyhow::Result<()> {
    let statuses = relay.statuses().await?;

    println!(
        "{:<28} {:<32} {:<10} {:<8} {:<6}",
        "QUEUE ID", "RECIPIENT", "RESOLUTION", "OUTCOME", "AGE"
    );
    println!("{}", "-".repeat(88));

    for status in &statuses {
        println!(
            "{:<28} {:<32} {:<10} {:<8} {:<6}",
            status.queue_id.to_string(),
            status.recipient,
            status.resolution.to_string(),
            status.outcome,
            format_age(status.queue_id.timestamp_ms())
        );
    }

    println!("\nTotal: {} status(es)", statuses.len());

    Ok(())
}

fn format_age(timestamp_ms: u64) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    let age_secs = now.saturating_sub(u128::from(timestamp_ms)) / 1000;

    match age_secs {
        0..60 => format!("{age_secs}s"),
        60..3600 => format!("{}m", age_secs / 60),
        3600..86400 => format!("{}h", age_secs / 3600),
        _ => format!("{}d", age_secs / 86400),
    }
}

//! Demo binary: stream change events from a publication as JSON lines
//!
//! Thin caller of the library reader; one JSON document per change event on
//! stdout, logs on stderr.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};
use wal2events::{LogicalReplicationReader, ReplicationConfig};

#[derive(Parser, Debug)]
#[command(
    name = "wal2events",
    about = "Stream PostgreSQL logical replication changes as JSON events",
    version
)]
struct Args {
    /// libpq connection string for the source database
    #[arg(long)]
    dsn: String,

    /// Database name recorded in each event's table schema
    #[arg(long)]
    db_name: String,

    /// Publication to subscribe to (must already exist)
    #[arg(long, default_value = "pub")]
    publication: String,

    /// Replication slot to attach to (created when missing)
    #[arg(long, default_value = "wal2events")]
    slot: String,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!(
        "Streaming publication '{}' from slot '{}'",
        args.publication, args.slot
    );

    let config = ReplicationConfig::new(args.db_name, args.dsn, args.publication, args.slot)?;
    let reader = LogicalReplicationReader::connect(config)?;

    for event in reader {
        let event = event?;
        println!("{}", serde_json::to_string(&event)?);
    }

    info!("Replication stream ended");
    Ok(())
}

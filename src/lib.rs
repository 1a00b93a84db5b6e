//! Change-data-capture reader for PostgreSQL logical replication
//!
//! Attaches to a logical replication slot using the server's built-in
//! `pgoutput` output plugin, decodes the binary stream into row-change
//! events enriched with catalog schema metadata, and exposes the events as a
//! lazy iterator:
//!
//! 1. A dedicated thread owns the replication connection and its blocking
//!    copy-data loop, forwarding each message over a bounded channel.
//! 2. The caller's thread decodes each message, maintains relation-schema
//!    and transaction state, and assembles change events.
//!
//! The two stages run in lock-step: every raw message is acknowledged back
//! to the extractor before the next one flows, and only a confirmed ack
//! advances the flush LSN the server uses for WAL retention. Delivery is
//! at-least-once; recovery after a failure is the caller's decision.
//!
//! ```no_run
//! use wal2events::{LogicalReplicationReader, ReplicationConfig};
//!
//! # fn main() -> wal2events::ReplicationResult<()> {
//! let config = ReplicationConfig::new(
//!     "shop",
//!     "host=localhost dbname=shop user=replicator",
//!     "shop_pub",
//!     "shop_slot",
//! )?;
//! for event in LogicalReplicationReader::connect(config)? {
//!     println!("{:?}", event?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod core;
pub mod events;
pub mod protocol;
pub mod reader;
pub mod replication;
pub mod utils;

// Re-export the public surface
pub use crate::catalog::{CatalogProbe, SourceCatalog};
pub use crate::core::config::ReplicationConfig;
pub use crate::core::errors::{ReplicationError, ReplicationResult};
pub use crate::events::event::{
    CellValue, ChangeEvent, ColumnDefinition, Operation, Row, TableSchema, TransactionMetadata,
};
pub use crate::events::transform::EventTransformer;
pub use crate::reader::LogicalReplicationReader;
pub use crate::replication::extractor::{Ack, RawMessage};

//! Utility modules shared across the reader
//!
//! - libpq connection handling
//! - timestamp conversion between PostgreSQL and UTC representations

pub mod connection;
pub mod timestamp;

pub use connection::{PGConnection, PGResult};
pub use timestamp::{pg_micros_to_utc, system_time_to_pg_micros};

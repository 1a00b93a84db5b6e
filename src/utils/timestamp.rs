//! Timestamp conversion between PostgreSQL and UTC representations
//!
//! Replication timestamps travel as microseconds since the PostgreSQL epoch
//! (2000-01-01T00:00:00Z); standby status updates carry the client clock in
//! the same representation.

use crate::core::errors::{ReplicationError, ReplicationResult};
use chrono::{DateTime, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

// Seconds from Unix epoch (1970) to PostgreSQL epoch (2000)
const PG_EPOCH_OFFSET_SECS: i64 = 946_684_800;

/// Convert a PostgreSQL-epoch microsecond offset into a UTC timestamp.
pub fn pg_micros_to_utc(micros: i64) -> ReplicationResult<DateTime<Utc>> {
    let secs = micros.div_euclid(1_000_000) + PG_EPOCH_OFFSET_SECS;
    let nanos = micros.rem_euclid(1_000_000) * 1_000;
    DateTime::from_timestamp(secs, nanos as u32).ok_or_else(|| {
        ReplicationError::parse(format!(
            "timestamp out of range: {micros} microseconds past 2000-01-01"
        ))
    })
}

/// Convert SystemTime to PostgreSQL-epoch microseconds.
///
/// Used for the client clock field of standby status updates.
pub fn system_time_to_pg_micros(time: SystemTime) -> i64 {
    let duration_since_unix = time
        .duration_since(UNIX_EPOCH)
        .expect("SystemTime is before Unix epoch");

    let unix_secs = duration_since_unix.as_secs() as i64;
    let unix_micros = unix_secs * 1_000_000 + (duration_since_unix.subsec_micros() as i64);

    // Shift Unix epoch to PostgreSQL epoch
    unix_micros - PG_EPOCH_OFFSET_SECS * 1_000_000
}

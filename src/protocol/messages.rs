//! Message types for the pgoutput logical replication protocol
//!
//! Two layers travel over the copy-both stream: transport frames exchanged
//! with the walsender (XLogData, keepalive, standby status update) and the
//! pgoutput payloads carried inside XLogData frames. Decoded pgoutput
//! messages are pure values; the parser lives in [`crate::protocol::parser`].
//!
//! Wire reference:
//! https://www.postgresql.org/docs/current/protocol-logicalrep-message-formats.html
//! https://www.postgresql.org/docs/current/protocol-replication.html

use crate::core::errors::{ReplicationError, ReplicationResult};
use crate::protocol::buffer::{BufferReader, BufferWriter};
use chrono::{DateTime, Utc};

/// A decoded pgoutput protocol-version-1 message
///
/// A transaction flows as `Begin`, zero or more DML messages, `Commit`, with
/// `Relation` messages interleaved the first time a table is touched (and
/// again after DDL). Tags the transformer does not consume (`Origin`,
/// `Type`, logical `Message`) decode to `Unknown` and are skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum PgOutputMessage {
    /// Transaction start
    Begin {
        final_lsn: u64,
        commit_ts: DateTime<Utc>,
        tx_xid: u32,
    },

    /// Transaction end; all changes of the transaction are now durable
    Commit {
        flags: u8,
        lsn_commit: u64,
        final_tx_lsn: u64,
        commit_ts: DateTime<Utc>,
    },

    /// Schema of a table referenced by subsequent DML
    Relation { relation: RelationInfo },

    /// Row insertion
    Insert { relation_id: u32, new_tuple: TupleData },

    /// Row modification; the old image is present only when the key changed
    /// ('K') or the table has REPLICA IDENTITY FULL ('O')
    Update {
        relation_id: u32,
        key_kind: Option<char>,
        old_tuple: Option<TupleData>,
        new_tuple: TupleData,
    },

    /// Row deletion; 'K' carries the replica-identity key, 'O' the full old row
    Delete {
        relation_id: u32,
        key_kind: char,
        old_tuple: TupleData,
    },

    /// One or more tables truncated in a single statement
    Truncate {
        option_bits: u8,
        relation_ids: Vec<u32>,
    },

    /// Recognised but unconsumed tag (e.g. 'O' origin, 'Y' type)
    Unknown { tag: char },
}

impl PgOutputMessage {
    /// Message kind as a string for logging
    pub fn message_type(&self) -> &'static str {
        match self {
            PgOutputMessage::Begin { .. } => "Begin",
            PgOutputMessage::Commit { .. } => "Commit",
            PgOutputMessage::Relation { .. } => "Relation",
            PgOutputMessage::Insert { .. } => "Insert",
            PgOutputMessage::Update { .. } => "Update",
            PgOutputMessage::Delete { .. } => "Delete",
            PgOutputMessage::Truncate { .. } => "Truncate",
            PgOutputMessage::Unknown { .. } => "Unknown",
        }
    }
}

/// Schema information for a replicated table
#[derive(Debug, Clone, PartialEq)]
pub struct RelationInfo {
    pub relation_id: u32,
    pub namespace: String,
    pub relation_name: String,
    /// Same as relreplident in pg_class: 'd' default, 'n' nothing, 'f' full,
    /// 'i' using index
    pub replica_identity: char,
    pub columns: Vec<ColumnInfo>,
}

/// One column of a Relation message
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub part_of_pkey: bool,
    pub name: String,
    pub type_id: u32,
    pub atttypmod: i32,
}

/// One column of a tuple image
#[derive(Debug, Clone, PartialEq)]
pub enum TupleValue {
    /// SQL NULL
    Null,
    /// Unchanged TOASTed value; the server did not resend the data
    UnchangedToast,
    /// Text-formatted value
    Text(String),
}

/// The column values of one row image, in relation column order
#[derive(Debug, Clone, PartialEq)]
pub struct TupleData {
    pub values: Vec<TupleValue>,
}

/// XLogData transport frame ('w'): one pgoutput payload plus WAL positions
#[derive(Debug, Clone, PartialEq)]
pub struct XLogDataMessage {
    pub data_start: u64,
    pub wal_end: u64,
    /// Server clock at transmission, PostgreSQL-epoch microseconds
    pub send_time: i64,
    pub data: Vec<u8>,
}

impl XLogDataMessage {
    pub fn parse(frame: &[u8]) -> ReplicationResult<Self> {
        let mut reader = BufferReader::new(frame);
        let tag = reader.read_char()?;
        if tag != 'w' {
            return Err(ReplicationError::parse_with_context(
                format!("expected 'w' frame tag, got '{tag}'"),
                "XLogData",
            ));
        }
        let data_start = reader.read_u64()?;
        let wal_end = reader.read_u64()?;
        let send_time = reader.read_i64()?;
        let data = reader.read_rest();

        Ok(XLogDataMessage {
            data_start,
            wal_end,
            send_time,
            data,
        })
    }
}

/// Primary keepalive transport frame ('k')
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeepaliveMessage {
    pub wal_end: u64,
    /// Server clock at transmission, PostgreSQL-epoch microseconds
    pub send_time: i64,
    /// Server asks for an immediate standby status update
    pub reply_requested: bool,
}

impl KeepaliveMessage {
    pub fn parse(frame: &[u8]) -> ReplicationResult<Self> {
        let mut reader = BufferReader::new(frame);
        let tag = reader.read_char()?;
        if tag != 'k' {
            return Err(ReplicationError::parse_with_context(
                format!("expected 'k' frame tag, got '{tag}'"),
                "Keepalive",
            ));
        }
        let wal_end = reader.read_u64()?;
        let send_time = reader.read_i64()?;
        let reply_requested = reader.read_u8()? != 0;

        Ok(KeepaliveMessage {
            wal_end,
            send_time,
            reply_requested,
        })
    }
}

/// Standby status update frame ('r') sent back to the walsender
///
/// The flush LSN is what controls server-side WAL retention for the slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandbyStatusUpdate {
    pub write_lsn: u64,
    pub flush_lsn: u64,
    pub apply_lsn: u64,
    /// Client clock at transmission, PostgreSQL-epoch microseconds
    pub client_time: i64,
    pub reply_requested: bool,
}

/// Frame size: tag + three LSNs + clock + reply flag
pub const STANDBY_STATUS_UPDATE_LEN: usize = 1 + 8 + 8 + 8 + 8 + 1;

impl StandbyStatusUpdate {
    pub fn encode(&self) -> ReplicationResult<[u8; STANDBY_STATUS_UPDATE_LEN]> {
        let mut frame = [0u8; STANDBY_STATUS_UPDATE_LEN];
        let mut writer = BufferWriter::new(&mut frame);
        writer.write_u8(b'r')?;
        writer.write_u64(self.write_lsn)?;
        writer.write_u64(self.flush_lsn)?;
        writer.write_u64(self.apply_lsn)?;
        writer.write_i64(self.client_time)?;
        writer.write_u8(u8::from(self.reply_requested))?;
        debug_assert_eq!(writer.bytes_written(), STANDBY_STATUS_UPDATE_LEN);
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keepalive_frames() {
        let mut frame = vec![b'k'];
        frame.extend_from_slice(&23475352u64.to_be_bytes());
        frame.extend_from_slice(&1_000_000i64.to_be_bytes());
        frame.push(1);

        let keepalive = KeepaliveMessage::parse(&frame).unwrap();
        assert_eq!(keepalive.wal_end, 23475352);
        assert_eq!(keepalive.send_time, 1_000_000);
        assert!(keepalive.reply_requested);
    }

    #[test]
    fn parses_xlogdata_frames() {
        let mut frame = vec![b'w'];
        frame.extend_from_slice(&100u64.to_be_bytes());
        frame.extend_from_slice(&200u64.to_be_bytes());
        frame.extend_from_slice(&300i64.to_be_bytes());
        frame.extend_from_slice(b"B-payload");

        let xlog = XLogDataMessage::parse(&frame).unwrap();
        assert_eq!(xlog.data_start, 100);
        assert_eq!(xlog.wal_end, 200);
        assert_eq!(xlog.send_time, 300);
        assert_eq!(xlog.data, b"B-payload");
    }

    #[test]
    fn rejects_wrong_frame_tags() {
        assert!(KeepaliveMessage::parse(b"w\x00\x00").is_err());
        assert!(XLogDataMessage::parse(b"k\x00\x00").is_err());
    }

    #[test]
    fn status_update_encodes_to_the_documented_layout() {
        let status = StandbyStatusUpdate {
            write_lsn: 0x0166_3498,
            flush_lsn: 0x0166_3498,
            apply_lsn: 0x0166_3498,
            client_time: 42,
            reply_requested: false,
        };
        let frame = status.encode().unwrap();
        assert_eq!(frame.len(), 34);
        assert_eq!(frame[0], b'r');

        let mut reader = BufferReader::new(&frame[1..]);
        assert_eq!(reader.read_u64().unwrap(), 0x0166_3498);
        assert_eq!(reader.read_u64().unwrap(), 0x0166_3498);
        assert_eq!(reader.read_u64().unwrap(), 0x0166_3498);
        assert_eq!(reader.read_i64().unwrap(), 42);
        assert_eq!(reader.read_u8().unwrap(), 0);
    }
}

//! Parser for pgoutput protocol-version-1 payloads
//!
//! Pure functions over byte buffers; no I/O. The typed entry points fail
//! when the tag byte does not match, while [`MessageParser::decode`] maps
//! unrecognised top-level tags to [`PgOutputMessage::Unknown`] so the
//! transformer can skip them.

use crate::core::errors::{ReplicationError, ReplicationResult};
use crate::protocol::buffer::BufferReader;
use crate::protocol::messages::*;
use crate::utils::timestamp::pg_micros_to_utc;
use tracing::debug;

/// Parse logical replication messages from a payload buffer
pub struct MessageParser;

impl MessageParser {
    /// Decode one pgoutput payload, dispatching on its tag byte.
    pub fn decode(buffer: &[u8]) -> ReplicationResult<PgOutputMessage> {
        match buffer.first() {
            None => Err(ReplicationError::parse("empty pgoutput payload")),
            Some(b'B') => Self::parse_begin(buffer),
            Some(b'C') => Self::parse_commit(buffer),
            Some(b'R') => Self::parse_relation(buffer),
            Some(b'I') => Self::parse_insert(buffer),
            Some(b'U') => Self::parse_update(buffer),
            Some(b'D') => Self::parse_delete(buffer),
            Some(b'T') => Self::parse_truncate(buffer),
            Some(&tag) => {
                debug!("Ignoring unconsumed pgoutput message tag '{}'", tag as char);
                Ok(PgOutputMessage::Unknown { tag: tag as char })
            }
        }
    }

    pub fn parse_begin(buffer: &[u8]) -> ReplicationResult<PgOutputMessage> {
        let mut reader = Self::expect_tag(buffer, b'B')?;

        let final_lsn = reader.read_u64()?;
        let commit_ts = pg_micros_to_utc(reader.read_i64()?)?;
        let tx_xid = reader.read_u32()?;

        Ok(PgOutputMessage::Begin {
            final_lsn,
            commit_ts,
            tx_xid,
        })
    }

    pub fn parse_commit(buffer: &[u8]) -> ReplicationResult<PgOutputMessage> {
        let mut reader = Self::expect_tag(buffer, b'C')?;

        let flags = reader.read_u8()?;
        let lsn_commit = reader.read_u64()?;
        let final_tx_lsn = reader.read_u64()?;
        let commit_ts = pg_micros_to_utc(reader.read_i64()?)?;

        Ok(PgOutputMessage::Commit {
            flags,
            lsn_commit,
            final_tx_lsn,
            commit_ts,
        })
    }

    pub fn parse_relation(buffer: &[u8]) -> ReplicationResult<PgOutputMessage> {
        let mut reader = Self::expect_tag(buffer, b'R')?;

        let relation_id = reader.read_u32()?;
        let namespace = reader.read_cstr()?;
        let relation_name = reader.read_cstr()?;
        // relreplident travels as a single ASCII character, not a number
        let replica_identity = reader.read_char()?;
        let n_columns = reader.read_i16()?;

        let mut columns = Vec::with_capacity(n_columns.max(0) as usize);
        for _ in 0..n_columns {
            let flags = reader.read_u8()?;
            let name = reader.read_cstr()?;
            let type_id = reader.read_u32()?;
            let atttypmod = reader.read_i32()?;

            columns.push(ColumnInfo {
                part_of_pkey: flags == 1,
                name,
                type_id,
                atttypmod,
            });
        }

        Ok(PgOutputMessage::Relation {
            relation: RelationInfo {
                relation_id,
                namespace,
                relation_name,
                replica_identity,
                columns,
            },
        })
    }

    pub fn parse_insert(buffer: &[u8]) -> ReplicationResult<PgOutputMessage> {
        let mut reader = Self::expect_tag(buffer, b'I')?;

        let relation_id = reader.read_u32()?;
        let marker = reader.read_char()?;
        if marker != 'N' {
            return Err(ReplicationError::parse_with_context(
                format!("expected 'N' new-tuple marker, got '{marker}'"),
                "Insert",
            ));
        }
        let new_tuple = Self::parse_tuple_data(&mut reader)?;

        Ok(PgOutputMessage::Insert {
            relation_id,
            new_tuple,
        })
    }

    pub fn parse_update(buffer: &[u8]) -> ReplicationResult<PgOutputMessage> {
        let mut reader = Self::expect_tag(buffer, b'U')?;

        let relation_id = reader.read_u32()?;
        let marker = reader.read_char()?;

        // The old image ('K' key or 'O' full row) is optional; the new image
        // is always present and always introduced by 'N'.
        let (key_kind, old_tuple) = match marker {
            'K' | 'O' => {
                let old = Self::parse_tuple_data(&mut reader)?;
                let new_marker = reader.read_char()?;
                if new_marker != 'N' {
                    return Err(ReplicationError::parse_with_context(
                        format!("expected 'N' after old tuple, got '{new_marker}'"),
                        "Update",
                    ));
                }
                (Some(marker), Some(old))
            }
            'N' => (None, None),
            other => {
                return Err(ReplicationError::parse_with_context(
                    format!("unexpected tuple marker '{other}'"),
                    "Update",
                ));
            }
        };

        let new_tuple = Self::parse_tuple_data(&mut reader)?;

        Ok(PgOutputMessage::Update {
            relation_id,
            key_kind,
            old_tuple,
            new_tuple,
        })
    }

    pub fn parse_delete(buffer: &[u8]) -> ReplicationResult<PgOutputMessage> {
        let mut reader = Self::expect_tag(buffer, b'D')?;

        let relation_id = reader.read_u32()?;
        let key_kind = reader.read_char()?;
        if key_kind != 'K' && key_kind != 'O' {
            return Err(ReplicationError::parse_with_context(
                format!("tuple kind byte is not 'K' or 'O', got '{key_kind}'"),
                "Delete",
            ));
        }
        let old_tuple = Self::parse_tuple_data(&mut reader)?;

        Ok(PgOutputMessage::Delete {
            relation_id,
            key_kind,
            old_tuple,
        })
    }

    pub fn parse_truncate(buffer: &[u8]) -> ReplicationResult<PgOutputMessage> {
        let mut reader = Self::expect_tag(buffer, b'T')?;

        let n_relations = reader.read_i32()?;
        // bit 0 = CASCADE, bit 1 = RESTART IDENTITY
        let option_bits = reader.read_u8()?;

        let mut relation_ids = Vec::with_capacity(n_relations.max(0) as usize);
        for _ in 0..n_relations {
            relation_ids.push(reader.read_u32()?);
        }

        Ok(PgOutputMessage::Truncate {
            option_bits,
            relation_ids,
        })
    }

    fn expect_tag(buffer: &[u8], expected: u8) -> ReplicationResult<BufferReader<'_>> {
        let mut reader = BufferReader::new(buffer);
        let tag = reader.read_u8()?;
        if tag != expected {
            return Err(ReplicationError::parse(format!(
                "first byte '{}' does not match '{}' message tag",
                tag as char, expected as char
            )));
        }
        Ok(reader)
    }

    /// Parse a TupleData region from the shared reader.
    ///
    /// Consumes from the caller's cursor so that Update's old-then-new pair
    /// parses without a length prefix between the two regions.
    fn parse_tuple_data(reader: &mut BufferReader<'_>) -> ReplicationResult<TupleData> {
        let n_columns = reader.read_i16()?;

        let mut values = Vec::with_capacity(n_columns.max(0) as usize);
        for _ in 0..n_columns {
            let tag = reader.read_char()?;
            let value = match tag {
                'n' => TupleValue::Null,
                'u' => {
                    debug!("Unchanged TOAST value encountered");
                    TupleValue::UnchangedToast
                }
                't' => {
                    let length = reader.read_i32()?;
                    if length < 0 {
                        return Err(ReplicationError::parse_with_context(
                            format!("negative column value length {length}"),
                            "TupleData",
                        ));
                    }
                    let bytes = reader.read_bytes(length as usize)?;
                    TupleValue::Text(String::from_utf8_lossy(&bytes).into_owned())
                }
                other => {
                    return Err(ReplicationError::parse_with_context(
                        format!("unknown tuple column tag '{other}'"),
                        "TupleData",
                    ));
                }
            };
            values.push(value);
        }

        Ok(TupleData { values })
    }
}

//! Raw message extraction from the walsender connection
//!
//! The extractor runs on its own thread because libpq's copy-data read is a
//! blocking call. It forwards every XLogData payload over a bounded channel,
//! waits for the consumer's ack, and only then reports the message's LSN as
//! flushed to the server. That lock-step is what bounds server-side WAL
//! retention to the consumer's real progress.

use crate::core::config::ReplicationConfig;
use crate::core::errors::{ReplicationError, ReplicationResult};
use crate::protocol::messages::{KeepaliveMessage, StandbyStatusUpdate, XLogDataMessage};
use crate::replication::state::{ExtractorState, StreamPosition};
use crate::utils::connection::PGConnection;
use crate::utils::timestamp::{pg_micros_to_utc, system_time_to_pg_micros};
use chrono::{DateTime, Utc};
use libpq_sys::ExecStatusType;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

// SQLSTATEs the start sequence reacts to
const SQLSTATE_UNDEFINED_OBJECT: &str = "42704";
const SQLSTATE_OBJECT_IN_USE: &str = "55006";

/// One replication message as received from the server, before decoding
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub message_id: Uuid,
    pub data_start: u64,
    pub payload: Vec<u8>,
    pub send_time: DateTime<Utc>,
    pub data_size: usize,
    pub wal_end: u64,
}

/// Consumer confirmation for one raw message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub message_id: Uuid,
}

/// Outcome of forwarding one raw message through the channel pair
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Relay {
    /// Ack confirmed; report this LSN as flushed
    Flush(u64),
    /// Ack id did not match; skip the feedback, the server re-delivers on reconnect
    Skip,
    /// The consumer closed its channel end
    Disconnected,
}

/// Forward one raw message and block until its ack returns.
pub(crate) fn relay_raw_message(
    raw: RawMessage,
    raw_tx: &SyncSender<RawMessage>,
    ack_rx: &Receiver<Ack>,
) -> Relay {
    let message_id = raw.message_id;
    let data_start = raw.data_start;

    if raw_tx.send(raw).is_err() {
        return Relay::Disconnected;
    }

    match ack_rx.recv() {
        Err(_) => Relay::Disconnected,
        Ok(ack) if ack.message_id == message_id => Relay::Flush(data_start),
        Ok(ack) => {
            warn!(
                "Could not confirm message {}: ack carried {}. Did not flush at {:x}",
                message_id, ack.message_id, data_start
            );
            Relay::Skip
        }
    }
}

/// Worker that owns the replication connection and the streaming loop
///
/// Never retries internally: any streaming failure terminates the extractor
/// and the facade observes end-of-stream. Replaying from the right LSN is
/// the caller's policy decision.
pub struct RawExtractor {
    config: ReplicationConfig,
    raw_tx: SyncSender<RawMessage>,
    ack_rx: Receiver<Ack>,
    shutdown: Arc<AtomicBool>,
    state: ExtractorState,
    position: StreamPosition,
}

impl RawExtractor {
    pub fn new(
        config: ReplicationConfig,
        raw_tx: SyncSender<RawMessage>,
        ack_rx: Receiver<Ack>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            raw_tx,
            ack_rx,
            shutdown,
            state: ExtractorState::Disconnected,
            position: StreamPosition::new(),
        }
    }

    /// Connect, start streaming on the slot and run until shutdown or error.
    pub fn run(mut self) -> ReplicationResult<()> {
        let connection = PGConnection::connect(&self.config.replication_conninfo())?;
        self.state = ExtractorState::Connected;
        info!(
            "Connected to source in replication mode, slot: {}",
            self.config.slot_name
        );

        self.start_streaming(&connection)?;
        self.state = ExtractorState::Streaming;
        info!("Starting replication from slot: {}", self.config.slot_name);

        let result = self.stream_loop(&connection);
        self.state = ExtractorState::Terminated;
        result
    }

    pub fn state(&self) -> ExtractorState {
        self.state
    }

    /// Start streaming, creating the slot on first use.
    fn start_streaming(&self, connection: &PGConnection) -> ReplicationResult<()> {
        if self.try_start(connection)? {
            return Ok(());
        }

        info!(
            "Replication slot '{}' does not exist, creating it",
            self.config.slot_name
        );
        let create = format!(
            "CREATE_REPLICATION_SLOT \"{}\" LOGICAL pgoutput;",
            self.config.slot_name
        );
        let result = connection.exec(&create)?;
        if !result.is_ok() {
            return Err(ReplicationError::slot_creation(
                &self.config.slot_name,
                result.error_message(),
            ));
        }

        if self.try_start(connection)? {
            Ok(())
        } else {
            Err(ReplicationError::slot_creation(
                &self.config.slot_name,
                "slot missing again after creation",
            ))
        }
    }

    /// Issue START_REPLICATION. Returns false when the slot does not exist;
    /// a slot held by another consumer surfaces as its own error variant so
    /// callers can tell a stale session from a protocol failure.
    fn try_start(&self, connection: &PGConnection) -> ReplicationResult<bool> {
        let start = format!(
            "START_REPLICATION SLOT \"{}\" LOGICAL 0/0 (publication_names '{}', proto_version '1');",
            self.config.slot_name, self.config.publication_name
        );
        debug!("Executing: {}", start);

        let result = connection.exec(&start)?;
        if result.status() == ExecStatusType::PGRES_COPY_BOTH {
            return Ok(true);
        }

        match result.sqlstate().as_deref() {
            Some(SQLSTATE_UNDEFINED_OBJECT) => Ok(false),
            Some(SQLSTATE_OBJECT_IN_USE) => {
                Err(ReplicationError::slot_in_use(&self.config.slot_name))
            }
            _ => Err(ReplicationError::protocol(format!(
                "START_REPLICATION failed: {}",
                result.error_message()
            ))),
        }
    }

    fn stream_loop(&mut self, connection: &PGConnection) -> ReplicationResult<()> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested, leaving replication loop");
                // Best effort: report the last confirmed position before closing
                let _ = self.send_feedback(connection, self.position.flushed_lsn);
                return Ok(());
            }

            let Some(frame) = connection.get_copy_data()? else {
                info!("Copy stream ended by server");
                return Ok(());
            };
            if frame.is_empty() {
                continue;
            }

            match frame[0] {
                b'k' => self.handle_keepalive(connection, &frame)?,
                b'w' => {
                    if !self.handle_wal_frame(connection, &frame)? {
                        return Ok(());
                    }
                }
                other => {
                    warn!("Received unknown copy-data frame tag: {}", other as char);
                }
            }
        }
    }

    fn handle_keepalive(
        &mut self,
        connection: &PGConnection,
        frame: &[u8],
    ) -> ReplicationResult<()> {
        let keepalive = KeepaliveMessage::parse(frame)?;
        self.position.update_received(keepalive.wal_end);

        if keepalive.reply_requested {
            debug!("Server requested feedback in keepalive");
            self.send_feedback(connection, self.position.flushed_lsn)?;
        }
        Ok(())
    }

    /// Forward one XLogData payload and confirm it. Returns false when the
    /// consumer side is gone and the loop should end.
    fn handle_wal_frame(
        &mut self,
        connection: &PGConnection,
        frame: &[u8],
    ) -> ReplicationResult<bool> {
        let xlog = XLogDataMessage::parse(frame)?;
        self.position.update_received(xlog.data_start);

        let raw = RawMessage {
            message_id: Uuid::new_v4(),
            data_start: xlog.data_start,
            data_size: xlog.data.len(),
            send_time: pg_micros_to_utc(xlog.send_time)?,
            wal_end: xlog.wal_end,
            payload: xlog.data,
        };
        let message_id = raw.message_id;

        match relay_raw_message(raw, &self.raw_tx, &self.ack_rx) {
            Relay::Flush(lsn) => {
                self.position.update_flushed(lsn);
                self.send_feedback(connection, lsn)?;
                debug!("Flushed message {} at {:x}", message_id, lsn);
                Ok(true)
            }
            Relay::Skip => Ok(true),
            Relay::Disconnected => {
                info!("Consumer channel closed, stopping extraction");
                Ok(false)
            }
        }
    }

    fn send_feedback(&self, connection: &PGConnection, flush_lsn: u64) -> ReplicationResult<()> {
        let status = StandbyStatusUpdate {
            write_lsn: self.position.received_lsn,
            flush_lsn,
            apply_lsn: flush_lsn,
            client_time: system_time_to_pg_micros(SystemTime::now()),
            reply_requested: false,
        };
        connection.put_copy_data(&status.encode()?)?;
        connection.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;
    use std::thread;

    fn raw_message(lsn: u64) -> RawMessage {
        RawMessage {
            message_id: Uuid::new_v4(),
            data_start: lsn,
            payload: vec![b'B'],
            send_time: Utc::now(),
            data_size: 1,
            wal_end: lsn,
        }
    }

    #[test]
    fn every_acked_message_is_flushed_in_order() {
        let (raw_tx, raw_rx) = sync_channel::<RawMessage>(1);
        let (ack_tx, ack_rx) = sync_channel::<Ack>(1);

        let consumer = thread::spawn(move || {
            let mut seen = Vec::new();
            while let Ok(raw) = raw_rx.recv() {
                seen.push(raw.message_id);
                ack_tx
                    .send(Ack {
                        message_id: raw.message_id,
                    })
                    .unwrap();
            }
            seen
        });

        let lsns: Vec<u64> = vec![100, 200, 300, 400, 500];
        let mut sent_ids = Vec::new();
        let mut flushed = Vec::new();
        for &lsn in &lsns {
            let raw = raw_message(lsn);
            sent_ids.push(raw.message_id);
            match relay_raw_message(raw, &raw_tx, &ack_rx) {
                Relay::Flush(lsn) => flushed.push(lsn),
                other => panic!("unexpected relay outcome: {other:?}"),
            }
        }
        drop(raw_tx);

        // One feedback per acked message, in send order
        assert_eq!(flushed, lsns);
        // Ack ids observed by the consumer equal the ids sent, in order
        assert_eq!(consumer.join().unwrap(), sent_ids);
    }

    #[test]
    fn mismatched_ack_skips_feedback() {
        let (raw_tx, raw_rx) = sync_channel::<RawMessage>(1);
        let (ack_tx, ack_rx) = sync_channel::<Ack>(1);

        let consumer = thread::spawn(move || {
            let _ = raw_rx.recv().unwrap();
            ack_tx
                .send(Ack {
                    message_id: Uuid::new_v4(),
                })
                .unwrap();
        });

        assert_eq!(
            relay_raw_message(raw_message(100), &raw_tx, &ack_rx),
            Relay::Skip
        );
        consumer.join().unwrap();
    }

    #[test]
    fn dropped_consumer_ends_the_relay() {
        let (raw_tx, raw_rx) = sync_channel::<RawMessage>(1);
        let (_ack_tx, ack_rx) = sync_channel::<Ack>(1);
        drop(raw_rx);

        assert_eq!(
            relay_raw_message(raw_message(100), &raw_tx, &ack_rx),
            Relay::Disconnected
        );
    }

    #[test]
    fn dropped_ack_sender_ends_the_relay() {
        let (raw_tx, raw_rx) = sync_channel::<RawMessage>(1);
        let (ack_tx, ack_rx) = sync_channel::<Ack>(1);
        drop(ack_tx);

        let consumer = thread::spawn(move || {
            let _ = raw_rx.recv();
        });

        assert_eq!(
            relay_raw_message(raw_message(100), &raw_tx, &ack_rx),
            Relay::Disconnected
        );
        consumer.join().unwrap();
    }
}

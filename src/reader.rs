//! Reader facade over the extraction and transformation stages
//!
//! Wires the extractor thread, the bounded channel pair and the transformer,
//! and exposes the change events as a lazy iterator. Capacity 1 in each
//! direction is sufficient because the ack protocol is strictly lock-step.

use crate::catalog::{CatalogProbe, SourceCatalog};
use crate::core::config::ReplicationConfig;
use crate::core::errors::ReplicationResult;
use crate::events::event::ChangeEvent;
use crate::events::transform::EventTransformer;
use crate::replication::extractor::{Ack, RawExtractor, RawMessage};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

const POLL_TIMEOUT: Duration = Duration::from_millis(500);
const HEARTBEAT_EVERY_POLLS: u64 = 50;
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Lazy, ordered sequence of change events from one replication slot
///
/// Iteration blocks until traffic arrives. A transformer failure yields one
/// final `Err` and ends the sequence; the extractor going away (server
/// disconnect, shutdown) ends it silently. Dropping the reader stops the
/// extractor.
pub struct LogicalReplicationReader<C: CatalogProbe = SourceCatalog> {
    transformer: EventTransformer<C>,
    raw_rx: Option<Receiver<RawMessage>>,
    ack_tx: Option<SyncSender<Ack>>,
    shutdown: Arc<AtomicBool>,
    extractor: Option<JoinHandle<()>>,
    pending: VecDeque<ChangeEvent>,
    poll_count: u64,
    message_count: u64,
    stopped: bool,
    finished: bool,
}

impl LogicalReplicationReader<SourceCatalog> {
    /// Connect to the source and start streaming from the configured slot.
    ///
    /// Opens two connections: the catalog probe's plain connection here, and
    /// the replication connection on the extractor thread.
    pub fn connect(config: ReplicationConfig) -> ReplicationResult<Self> {
        let catalog = SourceCatalog::connect(config.conninfo())?;
        let transformer = EventTransformer::new(catalog, config.db_name.clone());

        let (raw_tx, raw_rx) = mpsc::sync_channel::<RawMessage>(1);
        let (ack_tx, ack_rx) = mpsc::sync_channel::<Ack>(1);
        let shutdown = Arc::new(AtomicBool::new(false));

        let extractor = RawExtractor::new(config, raw_tx, ack_rx, Arc::clone(&shutdown));
        let handle = thread::Builder::new()
            .name("wal2events-extractor".to_string())
            .spawn(move || match extractor.run() {
                Ok(()) => info!("Raw extractor terminated"),
                Err(err) => error!("Raw extractor failed: {}", err),
            })?;

        Ok(Self::from_parts(transformer, raw_rx, ack_tx, shutdown, Some(handle)))
    }
}

impl<C: CatalogProbe> LogicalReplicationReader<C> {
    pub(crate) fn from_parts(
        transformer: EventTransformer<C>,
        raw_rx: Receiver<RawMessage>,
        ack_tx: SyncSender<Ack>,
        shutdown: Arc<AtomicBool>,
        extractor: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            transformer,
            raw_rx: Some(raw_rx),
            ack_tx: Some(ack_tx),
            shutdown,
            extractor,
            pending: VecDeque::new(),
            poll_count: 0,
            message_count: 0,
            stopped: false,
            finished: false,
        }
    }

    /// Stop the extractor and release both channel ends.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        info!("Stopping replication reader");
        self.shutdown.store(true, Ordering::SeqCst);
        // Closing both ends unblocks the extractor's send and ack waits
        self.ack_tx.take();
        self.raw_rx.take();
        thread::sleep(SHUTDOWN_GRACE);

        if let Some(handle) = self.extractor.take() {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                // Blocked in the libpq read; it exits at the next server
                // frame or keepalive and the connection drops with it
                debug!("Extractor thread still blocked on the socket, detaching");
            }
        }
    }

    /// Pull the next event, polling the raw channel until one is produced
    /// or the stream ends.
    fn poll_next(&mut self) -> ReplicationResult<Option<ChangeEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            let received = match self.raw_rx.as_ref() {
                None => return Ok(None),
                Some(raw_rx) => raw_rx.recv_timeout(POLL_TIMEOUT),
            };

            self.poll_count += 1;
            if self.poll_count % HEARTBEAT_EVERY_POLLS == 0 {
                info!(
                    "poll count: {}, messages processed: {}",
                    self.poll_count, self.message_count
                );
            }

            match received {
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
                Ok(raw) => {
                    // A transformer failure must not ack: the message was
                    // not processed and the server should re-deliver it.
                    let events = self.transformer.handle(&raw)?;

                    // Ack per raw message, not per event, so feedback also
                    // advances on Begin/Commit/Relation.
                    if let Some(ack_tx) = self.ack_tx.as_ref() {
                        let _ = ack_tx.send(Ack {
                            message_id: raw.message_id,
                        });
                    }
                    self.message_count += 1;
                    self.pending.extend(events);
                }
            }
        }
    }
}

impl<C: CatalogProbe> Iterator for LogicalReplicationReader<C> {
    type Item = ReplicationResult<ChangeEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.poll_next() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.finished = true;
                self.stop();
                None
            }
            Err(err) => {
                error!("Error transforming replication stream: {}", err);
                self.finished = true;
                self.stop();
                Some(Err(err))
            }
        }
    }
}

impl<C: CatalogProbe> Drop for LogicalReplicationReader<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ReplicationResult;
    use chrono::Utc;
    use uuid::Uuid;

    struct StubCatalog;

    impl CatalogProbe for StubCatalog {
        fn fetch_type_name(&mut self, type_id: u32, _atttypmod: i32) -> ReplicationResult<String> {
            Ok(match type_id {
                23 => "integer".to_string(),
                1184 => "timestamp with time zone".to_string(),
                _ => "text".to_string(),
            })
        }

        fn fetch_is_optional(
            &mut self,
            _schema: &str,
            _table: &str,
            column: &str,
        ) -> ReplicationResult<bool> {
            Ok(column != "id")
        }
    }

    fn raw(lsn: u64, payload: &[u8]) -> RawMessage {
        RawMessage {
            message_id: Uuid::new_v4(),
            data_start: lsn,
            payload: payload.to_vec(),
            send_time: Utc::now(),
            data_size: payload.len(),
            wal_end: lsn,
        }
    }

    #[test]
    fn acks_every_message_and_yields_events_in_order() {
        let (raw_tx, raw_rx) = mpsc::sync_channel::<RawMessage>(1);
        let (ack_tx, ack_rx) = mpsc::sync_channel::<Ack>(1);
        let shutdown = Arc::new(AtomicBool::new(false));

        // Stand-in extractor: forwards a fixed transaction lock-step and
        // records the acks it observes.
        let feeder = thread::spawn(move || {
            let payloads: Vec<&[u8]> = vec![
                b"R\x00\x00@\x01public\x00test_table\x00d\x00\x02\x01id\x00\x00\x00\x00\x17\xff\xff\xff\xff\x00created\x00\x00\x00\x04\xa0\xff\xff\xff\xff",
                b"B\x00\x00\x00\x00\x01f4\x98\x00\x02ck\xd8i\x8a1\x00\x00\x01\xeb",
                b"I\x00\x00@\x01N\x00\x02t\x00\x00\x00\x015t\x00\x00\x00\x162012-01-01 12:00:00+00",
                b"C\x00\x00\x00\x00\x00\x01f4\x98\x00\x00\x00\x00\x01f4\xc8\x00\x02cl\x83\x8f\xd2\xa1",
            ];
            let mut acks = Vec::new();
            for (index, payload) in payloads.iter().enumerate() {
                let message = raw((index as u64 + 1) * 10, payload);
                let message_id = message.message_id;
                raw_tx.send(message).unwrap();
                let ack = ack_rx.recv().unwrap();
                assert_eq!(ack.message_id, message_id);
                acks.push(ack.message_id);
            }
            acks
        });

        let transformer = EventTransformer::new(StubCatalog, "test");
        let mut reader =
            LogicalReplicationReader::from_parts(transformer, raw_rx, ack_tx, shutdown, None);

        let event = reader.next().expect("one event").expect("no error");
        assert_eq!(event.op, crate::events::event::Operation::Insert);
        assert_eq!(event.lsn, 30);

        // Feeder dropped its channel end after the commit; the sequence ends.
        assert!(reader.next().is_none());

        // Exactly one ack per raw message, Begin/Commit/Relation included
        let acks = feeder.join().unwrap();
        assert_eq!(acks.len(), 4);
    }

    #[test]
    fn transformer_error_ends_the_sequence_with_one_err() {
        let (raw_tx, raw_rx) = mpsc::sync_channel::<RawMessage>(1);
        let (ack_tx, _ack_rx) = mpsc::sync_channel::<Ack>(1);
        let shutdown = Arc::new(AtomicBool::new(false));

        // Insert with no preceding Relation/Begin: a programmatic error
        let feeder = thread::spawn(move || {
            let payload: &[u8] =
                b"I\x00\x00@\x01N\x00\x02t\x00\x00\x00\x015t\x00\x00\x00\x162012-01-01 12:00:00+00";
            raw_tx.send(raw(10, payload)).unwrap();
        });

        let transformer = EventTransformer::new(StubCatalog, "test");
        let mut reader =
            LogicalReplicationReader::from_parts(transformer, raw_rx, ack_tx, shutdown, None);

        assert!(matches!(reader.next(), Some(Err(_))));
        assert!(reader.next().is_none());
        feeder.join().unwrap();
    }
}

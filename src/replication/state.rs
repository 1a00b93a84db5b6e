//! Extractor lifecycle and stream position tracking

/// Lifecycle of the raw extractor
///
/// `Streaming → Terminated` happens on explicit stop, on an unrecoverable
/// server error, or when the slot turns out to be bound to another consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorState {
    Disconnected,
    Connected,
    Streaming,
    Terminated,
}

/// WAL positions reported in standby status updates
#[derive(Debug, Default)]
pub struct StreamPosition {
    /// Highest LSN seen from the server (XLogData starts and keepalives)
    pub received_lsn: u64,
    /// Last LSN acknowledged as flushed after a confirmed ack
    pub flushed_lsn: u64,
}

impl StreamPosition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the received LSN; positions never move backwards.
    pub fn update_received(&mut self, lsn: u64) {
        if lsn > 0 {
            self.received_lsn = std::cmp::max(self.received_lsn, lsn);
        }
    }

    /// Raise the flushed LSN after a confirmed ack.
    pub fn update_flushed(&mut self, lsn: u64) {
        if lsn > 0 {
            self.flushed_lsn = std::cmp::max(self.flushed_lsn, lsn);
        }
    }
}

//! Raw extraction side of the replication pipeline
//!
//! Owns the walsender connection, the streaming loop and the
//! one-message/one-ack feedback contract with the consumer.

pub mod extractor;
pub mod state;

// Re-export for convenience
pub use extractor::{Ack, RawExtractor, RawMessage};
pub use state::{ExtractorState, StreamPosition};

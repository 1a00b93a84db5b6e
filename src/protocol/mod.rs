//! pgoutput protocol handling
//!
//! Buffer access, message definitions and the pure decoder for the
//! protocol-version-1 wire format.

pub mod buffer;
pub mod messages;
pub mod parser;

// Re-export for convenience
pub use buffer::{BufferReader, BufferWriter};
pub use messages::*;
pub use parser::MessageParser;

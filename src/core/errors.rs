//! Error types for the replication reader
//! Provides structured error handling using thiserror for better error reporting

use thiserror::Error;

/// Main error type for the wal2events reader
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Database connection related errors
    #[error("Database connection error: {message}")]
    Connection { message: String },

    /// Configuration related errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Malformed pgoutput or replication transport message
    #[error("Malformed message: {message}")]
    MalformedMessage {
        message: String,
        context: Option<String>,
    },

    /// Replication protocol errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Catalog lookup against the source database failed
    #[error("Catalog query error: {message}")]
    CatalogQuery { message: String },

    /// A change event could not be assembled from a decoded message
    #[error("Event assembly error: {message}")]
    EventAssembly { message: String },

    /// The replication slot is already bound to another consumer
    #[error("Replication slot '{slot}' is in use by another consumer")]
    SlotInUse { slot: String },

    /// The replication slot is missing and could not be created
    #[error("Replication slot '{slot}' could not be created: {message}")]
    SlotCreation { slot: String, message: String },

    /// DML referenced a relation id with no preceding Relation message
    #[error("No schema cached for relation id {relation_id}")]
    MissingRelation { relation_id: u32 },

    /// DML arrived outside an open transaction
    #[error("DML message received outside an open transaction")]
    MissingTransaction,

    /// Network/IO related errors
    #[error("Network IO error")]
    NetworkIO(#[from] std::io::Error),

    /// C string conversion errors
    #[error("C string conversion error")]
    CStringConversion(#[from] std::ffi::NulError),
}

/// Result type alias for convenience
pub type ReplicationResult<T> = std::result::Result<T, ReplicationError>;

impl ReplicationError {
    /// Create a connection error with context
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a malformed-message error
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::MalformedMessage {
            message: message.into(),
            context: None,
        }
    }

    /// Create a malformed-message error with context
    pub fn parse_with_context<S: Into<String>, C: Into<String>>(message: S, context: C) -> Self {
        Self::MalformedMessage {
            message: message.into(),
            context: Some(context.into()),
        }
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a catalog query error
    pub fn catalog<S: Into<String>>(message: S) -> Self {
        Self::CatalogQuery {
            message: message.into(),
        }
    }

    /// Create an event assembly error
    pub fn assembly<S: Into<String>>(message: S) -> Self {
        Self::EventAssembly {
            message: message.into(),
        }
    }

    /// Create a slot-in-use error
    pub fn slot_in_use<S: Into<String>>(slot: S) -> Self {
        Self::SlotInUse { slot: slot.into() }
    }

    /// Create a slot-creation error
    pub fn slot_creation<S: Into<String>, M: Into<String>>(slot: S, message: M) -> Self {
        Self::SlotCreation {
            slot: slot.into(),
            message: message.into(),
        }
    }
}

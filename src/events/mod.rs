//! Change-event assembly
//!
//! The emitted event surface, the per-relation validation models and the
//! transformer that turns raw replication messages into events.

pub mod event;
pub mod model;
pub mod transform;

// Re-export for convenience
pub use event::{
    CellValue, ChangeEvent, ColumnDefinition, Operation, Row, TableSchema, TransactionMetadata,
};
pub use model::RelationModel;
pub use transform::EventTransformer;

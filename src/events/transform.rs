//! Transformation of raw replication messages into change events
//!
//! Single-threaded state machine fed one raw message at a time. Relation
//! messages populate the schema, model and type-name caches (consulting the
//! catalog probe on first sight); Begin/Commit bracket the open transaction;
//! DML and Truncate messages produce events. Caches live until shutdown and
//! grow only with the number of distinct published relations.

use crate::catalog::CatalogProbe;
use crate::core::errors::{ReplicationError, ReplicationResult};
use crate::events::event::{
    ChangeEvent, ColumnDefinition, Operation, TableSchema, TransactionMetadata,
};
use crate::events::model::RelationModel;
use crate::protocol::messages::{PgOutputMessage, RelationInfo, TupleData};
use crate::protocol::parser::MessageParser;
use crate::replication::extractor::RawMessage;
use std::collections::HashMap;
use tracing::debug;

/// Stateful consumer of raw messages
pub struct EventTransformer<C: CatalogProbe> {
    catalog: C,
    db_name: String,
    schemas: HashMap<u32, TableSchema>,
    models: HashMap<u32, RelationModel>,
    type_names: HashMap<u32, String>,
    current_tx: Option<TransactionMetadata>,
}

impl<C: CatalogProbe> EventTransformer<C> {
    pub fn new(catalog: C, db_name: impl Into<String>) -> Self {
        Self {
            catalog,
            db_name: db_name.into(),
            schemas: HashMap::new(),
            models: HashMap::new(),
            type_names: HashMap::new(),
            current_tx: None,
        }
    }

    /// Consume one raw message and return the events it produces.
    ///
    /// Most messages produce none (Begin, Commit, Relation); DML produces
    /// one; Truncate produces one per truncated relation.
    pub fn handle(&mut self, raw: &RawMessage) -> ReplicationResult<Vec<ChangeEvent>> {
        let decoded = MessageParser::decode(&raw.payload)?;
        debug!(
            "Transforming {} message at {:x}",
            decoded.message_type(),
            raw.data_start
        );

        match decoded {
            PgOutputMessage::Relation { relation } => {
                self.install_relation(relation)?;
                Ok(Vec::new())
            }
            PgOutputMessage::Begin {
                final_lsn,
                commit_ts,
                tx_xid,
            } => {
                // The previous transaction is fully processed once the next
                // Begin arrives; overwriting is enough.
                self.current_tx = Some(TransactionMetadata {
                    tx_id: tx_xid,
                    begin_lsn: final_lsn,
                    commit_ts,
                });
                Ok(Vec::new())
            }
            PgOutputMessage::Insert {
                relation_id,
                new_tuple,
            } => Ok(vec![self.dml_event(
                Operation::Insert,
                relation_id,
                raw,
                None,
                Some(&new_tuple),
            )?]),
            PgOutputMessage::Update {
                relation_id,
                old_tuple,
                new_tuple,
                ..
            } => Ok(vec![self.dml_event(
                Operation::Update,
                relation_id,
                raw,
                old_tuple.as_ref(),
                Some(&new_tuple),
            )?]),
            PgOutputMessage::Delete {
                relation_id,
                old_tuple,
                ..
            } => Ok(vec![self.dml_event(
                Operation::Delete,
                relation_id,
                raw,
                Some(&old_tuple),
                None,
            )?]),
            PgOutputMessage::Truncate { relation_ids, .. } => relation_ids
                .iter()
                .map(|&relation_id| {
                    self.dml_event(Operation::Truncate, relation_id, raw, None, None)
                })
                .collect(),
            PgOutputMessage::Commit { .. } => {
                self.current_tx = None;
                Ok(Vec::new())
            }
            PgOutputMessage::Unknown { tag } => {
                debug!("Skipping pgoutput message with tag '{}'", tag);
                Ok(Vec::new())
            }
        }
    }

    /// Install or replace the schema and model for a relation.
    ///
    /// A Relation message mid-stream reflects DDL; it takes effect for every
    /// subsequent event, already-emitted events are not revisited.
    fn install_relation(&mut self, relation: RelationInfo) -> ReplicationResult<()> {
        let mut column_definitions = Vec::with_capacity(relation.columns.len());
        for column in &relation.columns {
            let type_name = match self.type_names.get(&column.type_id) {
                Some(name) => name.clone(),
                None => {
                    let name = self
                        .catalog
                        .fetch_type_name(column.type_id, column.atttypmod)?;
                    self.type_names.insert(column.type_id, name.clone());
                    name
                }
            };
            let optional = self.catalog.fetch_is_optional(
                &relation.namespace,
                &relation.relation_name,
                &column.name,
            )?;

            column_definitions.push(ColumnDefinition {
                name: column.name.clone(),
                part_of_pkey: column.part_of_pkey,
                type_id: column.type_id,
                type_name,
                optional,
            });
        }

        let schema = TableSchema {
            db: self.db_name.clone(),
            schema_name: relation.namespace,
            table: relation.relation_name,
            relation_id: relation.relation_id,
            column_definitions,
        };
        debug!(
            "Cached schema for relation {} ({}.{})",
            schema.relation_id, schema.schema_name, schema.table
        );

        self.models
            .insert(relation.relation_id, RelationModel::from_schema(&schema));
        self.schemas.insert(relation.relation_id, schema);
        Ok(())
    }

    fn dml_event(
        &self,
        op: Operation,
        relation_id: u32,
        raw: &RawMessage,
        old_tuple: Option<&TupleData>,
        new_tuple: Option<&TupleData>,
    ) -> ReplicationResult<ChangeEvent> {
        let transaction = self
            .current_tx
            .clone()
            .ok_or(ReplicationError::MissingTransaction)?;
        let table_schema = self
            .schemas
            .get(&relation_id)
            .ok_or(ReplicationError::MissingRelation { relation_id })?
            .clone();
        let model = self
            .models
            .get(&relation_id)
            .ok_or(ReplicationError::MissingRelation { relation_id })?;

        let before = old_tuple.map(|tuple| model.coerce(tuple)).transpose()?;
        let after = new_tuple.map(|tuple| model.validate(tuple)).transpose()?;

        Ok(ChangeEvent {
            op,
            message_id: raw.message_id,
            lsn: raw.data_start,
            transaction,
            table_schema,
            before,
            after,
        })
    }
}

//! Catalog lookups against the source database
//!
//! The transformer needs two answers the replication stream does not carry:
//! the human-readable name of a column's type and whether the column accepts
//! NULL. Both come from the source catalog over a plain autocommit
//! connection, separate from the replication connection.

use crate::core::errors::{ReplicationError, ReplicationResult};
use crate::utils::connection::PGConnection;

/// Read-only schema questions answered by the source database
///
/// The trait seam lets the transformer run against a stub in tests.
pub trait CatalogProbe {
    /// Formatted type name for `(type_id, atttypmod)`, e.g. `character varying(32)`.
    fn fetch_type_name(&mut self, type_id: u32, atttypmod: i32) -> ReplicationResult<String>;

    /// True when the column lacks a NOT NULL constraint.
    fn fetch_is_optional(
        &mut self,
        schema: &str,
        table: &str,
        column: &str,
    ) -> ReplicationResult<bool>;
}

/// Catalog probe backed by a dedicated libpq connection
pub struct SourceCatalog {
    connection: PGConnection,
}

impl SourceCatalog {
    /// Open the catalog connection. libpq connections are autocommit, which
    /// is all these single-statement lookups need.
    pub fn connect(conninfo: &str) -> ReplicationResult<Self> {
        let connection = PGConnection::connect(conninfo)?;
        Ok(Self { connection })
    }

    fn fetch_single_value(&self, query: &str) -> ReplicationResult<String> {
        let result = self.connection.exec(query)?;
        if !result.is_ok() {
            return Err(ReplicationError::catalog(format!(
                "query failed: {}",
                result.error_message()
            )));
        }
        if result.ntuples() == 0 {
            return Err(ReplicationError::catalog(format!(
                "query returned no rows: {query}"
            )));
        }
        result
            .getvalue(0, 0)
            .ok_or_else(|| ReplicationError::catalog(format!("query returned no value: {query}")))
    }
}

impl CatalogProbe for SourceCatalog {
    fn fetch_type_name(&mut self, type_id: u32, atttypmod: i32) -> ReplicationResult<String> {
        let query = format!("SELECT format_type({type_id}, {atttypmod}) AS data_type;");
        self.fetch_single_value(&query)
    }

    fn fetch_is_optional(
        &mut self,
        schema: &str,
        table: &str,
        column: &str,
    ) -> ReplicationResult<bool> {
        let query = format!(
            "SELECT attnotnull FROM pg_attribute \
             WHERE attrelid = '{schema}.{table}'::regclass AND attname = '{column}';"
        );
        // attnotnull reports the NOT NULL constraint; optional is its inverse
        let attnotnull = self.fetch_single_value(&query)?;
        Ok(attnotnull != "t")
    }
}
